//! A small scripted Engine, used by tests and the interactive shell in place
//! of a real operator runtime. A script is a `;`-separated list of steps:
//!
//! * `emit <value>...` reports each value as a result Record.
//! * `fail <message>` reports an error Record.
//! * `sleep <duration>` pauses (e.g. `sleep 150ms`), or stops upon an abort.
//!
//! Values which parse as integers or finite floats become Long or Double Records.
use crate::{Engine, ExecutionHandle};
use anyhow::Context;
use model::{Record, RecordRef};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Emit(Vec<RecordRef>),
    Fail(String),
    Sleep(Duration),
}

/// Parse a script into its steps.
pub fn parse(script: &str) -> anyhow::Result<Vec<Step>> {
    let mut steps = Vec::new();

    for (index, statement) in script.split(';').map(str::trim).enumerate() {
        if statement.is_empty() {
            continue;
        }
        let (verb, rest) = statement
            .split_once(char::is_whitespace)
            .map(|(verb, rest)| (verb, rest.trim()))
            .unwrap_or((statement, ""));

        let step = match verb {
            "emit" if !rest.is_empty() => Step::Emit(rest.split_whitespace().map(value).collect()),
            "fail" if !rest.is_empty() => Step::Fail(rest.to_string()),
            "sleep" => Step::Sleep(
                humantime::parse_duration(rest)
                    .with_context(|| format!("statement {}: invalid duration {rest:?}", index + 1))?,
            ),
            _ => anyhow::bail!("syntax error in statement {}: {statement:?}", index + 1),
        };
        steps.push(step);
    }

    if steps.is_empty() {
        anyhow::bail!("syntax error: script has no statements");
    }
    Ok(steps)
}

fn value(token: &str) -> RecordRef {
    if let Ok(v) = token.parse::<i64>() {
        Arc::new(Record::Long(v))
    } else if let Some(v) = token.parse::<f64>().ok().filter(|v| v.is_finite()) {
        Arc::new(Record::Double(v))
    } else {
        Record::string(token)
    }
}

/// Requirements are accepted as `name`, `name==version` or `name>=version`.
fn check_requirements(requirements: &[String]) -> anyhow::Result<()> {
    for requirement in requirements {
        let name = requirement
            .split_once("==")
            .or_else(|| requirement.split_once(">="))
            .map(|(name, version)| (!version.is_empty()).then_some(name))
            .unwrap_or(Some(requirement.as_str()));

        let valid = |name: &str| {
            !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        };
        match name {
            Some(name) if valid(name) => (),
            _ => anyhow::bail!("could not satisfy requirements: {requirement:?}"),
        }
    }
    Ok(())
}

/// ScriptedEngine runs scripts as tasks of the current tokio runtime.
#[derive(Debug, Default, Clone)]
pub struct ScriptedEngine;

impl Engine for ScriptedEngine {
    fn run(&self, handle: ExecutionHandle) -> anyhow::Result<()> {
        check_requirements(&handle.spec().requirements)?;
        let steps = parse(&handle.spec().definition)?;

        let runtime = tokio::runtime::Handle::try_current()
            .context("the scripted engine must be run within a tokio runtime")?;
        runtime.spawn(run_steps(handle, steps));

        Ok(())
    }
}

#[tracing::instrument(level = "debug", skip_all, fields(execution = %handle.id()))]
async fn run_steps(handle: ExecutionHandle, steps: Vec<Step>) {
    for step in steps {
        let reported = match step {
            Step::Emit(records) => records.into_iter().try_for_each(|r| handle.on_result(r)),
            Step::Fail(message) => handle.on_error(Record::error(message)),
            Step::Sleep(duration) => {
                tokio::select! {
                    () = handle.aborted() => return,
                    () = tokio::time::sleep(duration) => Ok(()),
                }
            }
        };
        if reported.is_err() {
            return; // Aborted.
        }
        // Let readers observe the growing prefix of results.
        tokio::task::yield_now().await;
    }

    if let Err(err) = handle.on_complete() {
        tracing::debug!(error = %err, "script completed after termination");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse() {
        let steps = parse("emit a 2 3.5 ; fail boom !; sleep 150ms;").unwrap();
        insta::assert_debug_snapshot!(steps, @r###"
        [
            Emit(
                [
                    String(
                        "a",
                    ),
                    Long(
                        2,
                    ),
                    Double(
                        3.5,
                    ),
                ],
            ),
            Fail(
                "boom !",
            ),
            Sleep(
                150ms,
            ),
        ]
        "###);
    }

    #[test]
    fn test_only_finite_numbers_are_doubles() {
        let steps = parse("emit nan inf -Infinity 1e3").unwrap();
        let Step::Emit(values) = &steps[0] else {
            panic!("expected emit, not {steps:?}");
        };
        assert_eq!(
            values,
            &vec![
                Record::string("nan"),
                Record::string("inf"),
                Record::string("-Infinity"),
                Arc::new(Record::Double(1000.0)),
            ]
        );
    }

    #[test]
    fn test_parse_errors() {
        for (script, expect) in [
            ("", "syntax error: script has no statements"),
            ("emit", "syntax error in statement 1: \"emit\""),
            ("emit a; frobnicate", "syntax error in statement 2: \"frobnicate\""),
            ("sleep soon", "statement 1: invalid duration \"soon\""),
        ] {
            assert_eq!(parse(script).unwrap_err().to_string(), expect);
        }
    }

    #[test]
    fn test_requirements() {
        let ok: Vec<String> = ["redis", "redis==3", "redis>=3", "py_lib-x"]
            .into_iter()
            .map(String::from)
            .collect();
        check_requirements(&ok).unwrap();

        for bad in ["", "redis==", "9c0e a", "a/b"] {
            let err = check_requirements(&[bad.to_string()]).unwrap_err();
            assert!(err.to_string().contains("could not satisfy requirements"));
        }
    }
}
