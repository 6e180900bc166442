// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use std::env;
use std::path::Path;

use anyhow::{bail, Result};
use regolith::*;
use serde::{Deserialize, Serialize};
use test_generator::test_resources;
use walkdir::WalkDir;

// Interprets the special encodings used in yaml expectations.
pub fn process_value(v: &Value) -> Result<Value> {
    match v {
        // set! :
        //   - item1
        //   - item2
        Value::Object(fields) if fields.len() == 1 => match v.get(&Value::from("set!")) {
            Some(Value::Array(items)) => {
                let mut set_value = Value::new_set();
                let set = set_value.as_set_mut()?;
                for item in items.iter() {
                    set.insert(Term::new(process_value(&item.value)?));
                }
                Ok(set_value)
            }
            _ => process_fields(v),
        },
        Value::Object(_) => process_fields(v),
        Value::Array(items) => {
            let mut array_value = Value::new_array();
            let array = array_value.as_array_mut()?;
            for item in items.iter() {
                array.push(Term::new(process_value(&item.value)?));
            }
            Ok(array_value)
        }
        Value::Set(_) => bail!("unexpected set in value read from yaml"),
        _ => Ok(v.clone()),
    }
}

fn process_fields(v: &Value) -> Result<Value> {
    let mut object_value = Value::new_object();
    let object = object_value.as_object_mut()?;
    for (key, value) in v.as_object()?.iter() {
        object.insert(
            Term::new(process_value(&key.value)?),
            Term::new(process_value(&value.value)?),
        );
    }
    Ok(object_value)
}

fn display_values(c: &Value, e: &Value) -> Result<String> {
    Ok(format!(
        "\nleft  = {}\nright = {}\n",
        serde_json::to_string_pretty(c)?,
        serde_json::to_string_pretty(e)?
    ))
}

#[derive(Serialize, Deserialize, PartialEq, Debug)]
struct TestCase {
    note: String,
    data: Option<Value>,
    input: Option<Value>,
    #[serde(default)]
    modules: Vec<String>,
    query: String,
    want_result: Option<Value>,
    want_error: Option<String>,
    strict_builtin_errors: Option<bool>,
    skip: Option<bool>,
}

#[derive(Serialize, Deserialize, PartialEq, Debug)]
struct YamlTest {
    cases: Vec<TestCase>,
}

// One entry per result: the bindings object, or the last expression value
// when the query binds nothing.
fn query_results_to_value(results: QueryResults) -> Value {
    let rows: Vec<Value> = results
        .result
        .into_iter()
        .map(|r| match r.bindings.is_empty() {
            false => Value::from(
                r.bindings
                    .into_iter()
                    .map(|(k, v)| (Value::from(k), v))
                    .collect::<std::collections::BTreeMap<Value, Value>>(),
            ),
            true => r.expressions.last().cloned().unwrap_or(Value::Null),
        })
        .collect();
    Value::from(rows)
}

fn eval_case(case: &TestCase, indexing: bool, early_exit: bool) -> Result<Value> {
    let mut engine = Engine::new();
    for (idx, rego) in case.modules.iter().enumerate() {
        engine.add_policy(format!("rego_{idx}.rego"), rego.clone())?;
    }
    if let Some(data) = &case.data {
        engine.add_data(data.clone())?;
    }

    let mut options = EvalOptions::default()
        .with_rule_indexing(indexing)
        .with_early_exit(early_exit)
        .with_strict_builtin_errors(case.strict_builtin_errors.unwrap_or(false));
    if let Some(input) = &case.input {
        options = options.with_input(input.clone());
    }

    let query = engine.prepare_for_eval(&case.query)?;
    Ok(query_results_to_value(query.eval(&Context::background(), options)?))
}

fn yaml_test_impl(file: &str) -> Result<()> {
    let yaml_str = std::fs::read_to_string(file)?;
    let test: YamlTest = serde_yaml::from_str(&yaml_str)?;

    println!("running {file}");

    for case in test.cases {
        print!("case {} ", case.note);
        if case.skip == Some(true) {
            println!("skipped");
            continue;
        }

        match (&case.want_result, &case.want_error) {
            (Some(_), None) | (None, Some(_)) => (),
            _ => bail!("{}: either want_result or want_error must be specified", case.note),
        }

        // Rule indexing and early exit are optimizations; every combination
        // must agree.
        for (indexing, early_exit) in [(true, true), (false, false), (true, false), (false, true)] {
            match (eval_case(&case, indexing, early_exit), &case.want_result, &case.want_error) {
                (Ok(computed), Some(want), _) => {
                    let expected = process_value(want)?;
                    if computed != expected {
                        bail!(
                            "{} (indexing: {indexing}, early exit: {early_exit}): mismatch{}",
                            case.note,
                            display_values(&computed, &expected)?
                        );
                    }
                }
                (Ok(_), None, _) => bail!("{}: eval succeeded and did not produce any errors", case.note),
                (Err(actual), _, Some(expected)) => {
                    let actual = actual.to_string();
                    if !actual.contains(expected.as_str()) {
                        bail!("Error message\n`{actual}\n`\ndoes not contain `{expected}`");
                    }
                }
                (Err(actual), _, None) => return Err(actual),
            }
        }

        println!("passed");
    }

    Ok(())
}

fn yaml_test(file: &str) -> Result<()> {
    match yaml_test_impl(file) {
        Ok(_) => Ok(()),
        Err(e) => {
            // Errors returned from tests are not always printed by cargo test.
            panic!("{}", e);
        }
    }
}

#[test_resources("tests/interpreter/**/*.yaml")]
fn run(path: &str) {
    yaml_test(path).unwrap()
}

#[test]
fn every_case_file_parses() -> Result<()> {
    let mut count = 0;
    for entry in WalkDir::new("tests/interpreter/cases")
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !Path::new(path).is_file() || path.extension().map_or(true, |e| e != "yaml") {
            continue;
        }
        let test: YamlTest = serde_yaml::from_str(&std::fs::read_to_string(path)?)?;
        assert!(!test.cases.is_empty(), "{}", path.display());
        count += test.cases.len();
    }
    assert!(count > 0);
    Ok(())
}

#[test]
#[ignore = "intended for running a single yaml file given on the command line"]
fn one_yaml() -> Result<()> {
    let Some(file) = env::args().find(|a| a.ends_with(".yaml")) else {
        bail!("missing <yaml-file>");
    };
    yaml_test(file.as_str())
}
