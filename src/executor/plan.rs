//! Batch plan files: many scenarios, each with a repeat count.
//!
//! A plan is a YAML or JSON document of the form:
//!
//! ```yaml
//! parallel: 4
//! scenarios:
//!   - pattern: "scenarios/*.json"
//!     repeat: 10
//!   - pattern: "special/one_off.yaml"
//!     repeat: 1
//!     yaml: true
//! ```
//!
//! Patterns expand deterministically (sorted), so the same plan always
//! produces the same run IDs and therefore the same lab names.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use walkdir::WalkDir;

use super::{generate_tasks, Task};

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path} (tried YAML and JSON): yaml: {yaml_error}; json: {json_error}")]
    Parse {
        path: PathBuf,
        yaml_error: serde_yaml::Error,
        json_error: serde_json::Error,
    },
    #[error("invalid plan file: no scenarios defined")]
    NoScenarios,
    #[error("invalid glob pattern {pattern:?}: {source}")]
    BadPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("no files match pattern {0:?}")]
    NoMatch(String),
}

/// A batch execution plan, immutable after load.
#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    /// Worker-pool size; values below 1 are normalized to 1 on load.
    #[serde(default)]
    pub parallel: usize,
    #[serde(default)]
    pub scenarios: Vec<ScenarioEntry>,
}

/// One scenario pattern in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScenarioEntry {
    /// Literal file path or glob pattern, relative to the plan file.
    pub pattern: String,
    /// Repetitions per matched file; values below 1 become 1 on load.
    #[serde(default)]
    pub repeat: usize,
    /// Parse matched scenarios as YAML instead of JSON.
    #[serde(default)]
    pub yaml: bool,
}

/// Kind of configuration file, detected from content rather than
/// extension so `clean` can accept either a plan or a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Plan,
    Scenario,
    Unknown,
}

/// Loads and normalizes a plan from a YAML or JSON file.
pub fn load_plan(path: &Path) -> Result<Plan, PlanError> {
    let text = fs::read_to_string(path).map_err(|source| PlanError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut plan: Plan = parse_either(&text, path)?;
    if plan.scenarios.is_empty() {
        return Err(PlanError::NoScenarios);
    }

    plan.parallel = plan.parallel.max(1);
    for entry in &mut plan.scenarios {
        entry.repeat = entry.repeat.max(1);
    }
    Ok(plan)
}

/// Detects whether a file holds a plan (has a `scenarios` key) or a
/// scenario (has `event` or `scenarioName`).
pub fn detect_file_kind(path: &Path) -> Result<FileKind, PlanError> {
    let text = fs::read_to_string(path).map_err(|source| PlanError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let value: serde_yaml::Value = parse_either(&text, path)?;

    if value.get("scenarios").is_some() {
        Ok(FileKind::Plan)
    } else if value.get("event").is_some() || value.get("scenarioName").is_some() {
        Ok(FileKind::Scenario)
    } else {
        Ok(FileKind::Unknown)
    }
}

/// Parses as YAML first (which also accepts JSON documents); on failure
/// retries as strict JSON so JSON files get a JSON error message.
fn parse_either<T: DeserializeOwned>(text: &str, path: &Path) -> Result<T, PlanError> {
    match serde_yaml::from_str(text) {
        Ok(value) => Ok(value),
        Err(yaml_error) => match serde_json::from_str(text) {
            Ok(value) => Ok(value),
            Err(json_error) => Err(PlanError::Parse {
                path: path.to_path_buf(),
                yaml_error,
                json_error,
            }),
        },
    }
}

impl Plan {
    /// Number of scenario entries and the total run count across all
    /// repeats, before glob expansion.
    pub fn summary(&self) -> (usize, usize) {
        let total_runs = self.scenarios.iter().map(|entry| entry.repeat).sum();
        (self.scenarios.len(), total_runs)
    }

    /// Expands glob patterns against the filesystem into one entry per
    /// matched file, sorted for reproducible run IDs.
    ///
    /// A literal path that matches nothing is kept as-is so the later
    /// scenario load reports the missing file; a glob that matches
    /// nothing is an error.
    pub fn expand_scenarios(&self, base_dir: &Path) -> Result<Vec<ScenarioEntry>, PlanError> {
        let mut expanded = Vec::new();

        for entry in &self.scenarios {
            let full = if Path::new(&entry.pattern).is_absolute() {
                PathBuf::from(&entry.pattern)
            } else {
                base_dir.join(&entry.pattern)
            };

            if !contains_glob_char(&entry.pattern) {
                let mut literal = entry.clone();
                if full.is_file() {
                    literal.pattern = full.to_string_lossy().into_owned();
                }
                expanded.push(literal);
                continue;
            }

            let matches = expand_pattern(&full, &entry.pattern)?;
            if matches.is_empty() {
                return Err(PlanError::NoMatch(entry.pattern.clone()));
            }
            for path in matches {
                expanded.push(ScenarioEntry {
                    pattern: path.to_string_lossy().into_owned(),
                    repeat: entry.repeat,
                    yaml: entry.yaml,
                });
            }
        }

        Ok(expanded)
    }
}

/// All tasks a plan describes: patterns expanded, then each matched file
/// crossed with its repeat count.
pub fn generate_tasks_from_plan(plan: &Plan, base_dir: &Path) -> Result<Vec<Task>, PlanError> {
    let expanded = plan.expand_scenarios(base_dir)?;

    let mut tasks = Vec::new();
    for entry in &expanded {
        tasks.extend(generate_tasks(
            Path::new(&entry.pattern),
            entry.repeat.max(1),
            entry.yaml,
        ));
    }
    Ok(tasks)
}

fn contains_glob_char(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

fn expand_pattern(full: &Path, raw: &str) -> Result<Vec<PathBuf>, PlanError> {
    let regex = glob_to_regex(&full.to_string_lossy()).map_err(|source| PlanError::BadPattern {
        pattern: raw.to_string(),
        source,
    })?;

    let mut matches: Vec<PathBuf> = WalkDir::new(walk_root(full))
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| regex.is_match(&path.to_string_lossy()))
        .collect();
    matches.sort();
    Ok(matches)
}

/// Deepest ancestor of the pattern that contains no glob characters;
/// this is where the filesystem walk starts.
fn walk_root(pattern: &Path) -> PathBuf {
    let mut root = PathBuf::new();
    for component in pattern.components() {
        if contains_glob_char(&component.as_os_str().to_string_lossy()) {
            break;
        }
        root.push(component);
    }
    if root.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        root
    }
}

/// Translates a shell-style glob into an anchored regex. `*` and `?` do
/// not cross path separators; character classes pass through, with `!`
/// negation mapped to `^`.
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => expr.push_str("[^/]*"),
            '?' => expr.push_str("[^/]"),
            '[' => {
                expr.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    expr.push('^');
                }
                for inner in chars.by_ref() {
                    expr.push(inner);
                    if inner == ']' {
                        break;
                    }
                }
            }
            other => {
                let mut buf = [0u8; 4];
                expr.push_str(&regex::escape(other.encode_utf8(&mut buf)));
            }
        }
    }

    expr.push('$');
    Regex::new(&expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_plan_applies_defaults() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "plan.yaml",
            "scenarios:\n  - pattern: a.json\n  - pattern: b.json\n    repeat: 5\n",
        );

        let plan = load_plan(&path).unwrap();
        assert_eq!(plan.parallel, 1);
        assert_eq!(plan.scenarios[0].repeat, 1);
        assert_eq!(plan.scenarios[1].repeat, 5);
        assert_eq!(plan.summary(), (2, 6));
    }

    #[test]
    fn test_load_plan_accepts_json() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "plan.json",
            r#"{"parallel": 4, "scenarios": [{"pattern": "a.json", "repeat": 2}]}"#,
        );

        let plan = load_plan(&path).unwrap();
        assert_eq!(plan.parallel, 4);
        assert_eq!(plan.summary(), (1, 2));
    }

    #[test]
    fn test_load_plan_rejects_empty_scenarios() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "plan.yaml", "parallel: 2\nscenarios: []\n");

        assert!(matches!(load_plan(&path), Err(PlanError::NoScenarios)));
    }

    #[test]
    fn test_detect_file_kind_by_content() {
        let dir = tempdir().unwrap();
        let plan = write(dir.path(), "p.json", r#"{"scenarios": []}"#);
        let scenario = write(dir.path(), "s.yaml", "scenarioName: demo\n");
        let event_only = write(dir.path(), "e.json", r#"{"event": []}"#);
        let other = write(dir.path(), "o.yaml", "foo: bar\n");

        assert_eq!(detect_file_kind(&plan).unwrap(), FileKind::Plan);
        assert_eq!(detect_file_kind(&scenario).unwrap(), FileKind::Scenario);
        assert_eq!(detect_file_kind(&event_only).unwrap(), FileKind::Scenario);
        assert_eq!(detect_file_kind(&other).unwrap(), FileKind::Unknown);
    }

    #[test]
    fn test_expand_scenarios_globs_sorted() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a2.json", "{}");
        write(dir.path(), "a1.json", "{}");
        write(dir.path(), "b.yaml", "{}");

        let plan = Plan {
            parallel: 1,
            scenarios: vec![ScenarioEntry {
                pattern: "a*.json".to_string(),
                repeat: 1,
                yaml: false,
            }],
        };

        let expanded = plan.expand_scenarios(dir.path()).unwrap();
        let names: Vec<&str> = expanded
            .iter()
            .map(|e| Path::new(&e.pattern).file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a1.json", "a2.json"]);
    }

    #[test]
    fn test_expand_scenarios_character_class() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a1.json", "{}");
        write(dir.path(), "a2.json", "{}");
        write(dir.path(), "a3.json", "{}");

        let plan = Plan {
            parallel: 1,
            scenarios: vec![ScenarioEntry {
                pattern: "a[12].json".to_string(),
                repeat: 1,
                yaml: false,
            }],
        };

        let expanded = plan.expand_scenarios(dir.path()).unwrap();
        assert_eq!(expanded.len(), 2);
        assert!(expanded.iter().all(|e| !e.pattern.ends_with("a3.json")));
    }

    #[test]
    fn test_expand_scenarios_literal_missing_is_kept() {
        let dir = tempdir().unwrap();

        let plan = Plan {
            parallel: 1,
            scenarios: vec![ScenarioEntry {
                pattern: "missing.json".to_string(),
                repeat: 2,
                yaml: false,
            }],
        };

        // The missing literal survives so the scenario load reports it.
        let expanded = plan.expand_scenarios(dir.path()).unwrap();
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].pattern, "missing.json");
    }

    #[test]
    fn test_expand_scenarios_unmatched_glob_fails() {
        let dir = tempdir().unwrap();

        let plan = Plan {
            parallel: 1,
            scenarios: vec![ScenarioEntry {
                pattern: "*.toml".to_string(),
                repeat: 1,
                yaml: false,
            }],
        };

        match plan.expand_scenarios(dir.path()) {
            Err(PlanError::NoMatch(pattern)) => assert_eq!(pattern, "*.toml"),
            other => panic!("expected NoMatch, got {other:?}"),
        }
    }

    #[test]
    fn test_generate_tasks_from_plan_crosses_repeat() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a1.json", "{}");
        write(dir.path(), "a2.json", "{}");

        let plan = Plan {
            parallel: 2,
            scenarios: vec![ScenarioEntry {
                pattern: "a*.json".to_string(),
                repeat: 2,
                yaml: false,
            }],
        };

        let tasks = generate_tasks_from_plan(&plan, dir.path()).unwrap();
        let ids: Vec<&str> = tasks.iter().map(|t| t.run_id.as_str()).collect();
        assert_eq!(ids, vec!["a1_001", "a1_002", "a2_001", "a2_002"]);
    }

    #[test]
    fn test_glob_does_not_cross_directories() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        write(dir.path(), "top.json", "{}");
        write(&dir.path().join("sub"), "nested.json", "{}");

        let plan = Plan {
            parallel: 1,
            scenarios: vec![ScenarioEntry {
                pattern: "*.json".to_string(),
                repeat: 1,
                yaml: false,
            }],
        };

        let expanded = plan.expand_scenarios(dir.path()).unwrap();
        assert_eq!(expanded.len(), 1);
        assert!(expanded[0].pattern.ends_with("top.json"));
    }
}
