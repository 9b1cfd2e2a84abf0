//! A minimal CLI touchpoint (§6 added) exercising the public Engine API —
//! explicitly not a supported administration interface, just a thin entry
//! point for manual smoke-testing, in the spirit of this crate's own
//! benches/doctests rather than a product surface.
//!
//! Usage: `junctured <root-dir>`, then line-oriented commands on stdin:
//!
//! ```text
//! add <record> <key> <value>
//! remove <record> <key> <value>
//! select <record> <key>
//! find <key> <op> <value>
//! quit
//! ```
//!
//! Values are parsed as an integer when possible, otherwise treated as a
//! string.

use std::io::{self, BufRead, Write as IoWrite};

use juncturedb::config::EngineConfig;
use juncturedb::db::Operator;
use juncturedb::engine::Engine;
use juncturedb::value::Value;

fn parse_value(token: &str) -> Value {
    if let Ok(n) = token.parse::<i64>() {
        Value::Long(n)
    } else {
        Value::String(token.to_string())
    }
}

fn parse_operator(token: &str) -> Option<Operator> {
    match token {
        "=" | "eq" => Some(Operator::Equals),
        "!=" | "ne" => Some(Operator::NotEquals),
        ">" | "gt" => Some(Operator::GreaterThan),
        ">=" | "ge" => Some(Operator::GreaterThanOrEquals),
        "<" | "lt" => Some(Operator::LessThan),
        "<=" | "le" => Some(Operator::LessThanOrEquals),
        "~" | "re" => Some(Operator::Regex),
        "!~" | "nre" => Some(Operator::NotRegex),
        _ => None,
    }
}

fn run(engine: &Engine, line: &str) -> Result<String, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["add", record, key, value] => {
            let record: i64 = record.parse().map_err(|e| format!("bad record: {e}"))?;
            let w = engine.add(*key, parse_value(value), record).map_err(|e| e.to_string())?;
            Ok(format!("ok version={}", w.version))
        }
        ["remove", record, key, value] => {
            let record: i64 = record.parse().map_err(|e| format!("bad record: {e}"))?;
            let w = engine.remove(*key, parse_value(value), record).map_err(|e| e.to_string())?;
            Ok(format!("ok version={}", w.version))
        }
        ["select", record, key] => {
            let record: i64 = record.parse().map_err(|e| format!("bad record: {e}"))?;
            let out = engine.select(record, key, None).map_err(|e| e.to_string())?;
            Ok(format!("{out:?}"))
        }
        ["find", key, op, value] => {
            let op = parse_operator(op).ok_or_else(|| format!("unknown operator: {op}"))?;
            let out = engine.find(key, op, &parse_value(value), None).map_err(|e| e.to_string())?;
            Ok(format!("{out:?}"))
        }
        _ => Err(format!("unrecognized command: {line}")),
    }
}

fn main() {
    let root = std::env::args().nth(1).unwrap_or_else(|| ".".to_string());
    let config = EngineConfig::at_root(&root, "default");
    let engine = match Engine::open(config) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("failed to open engine at {root}: {e}");
            std::process::exit(1);
        }
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }
        match run(&engine, line) {
            Ok(msg) => {
                let _ = writeln!(stdout, "{msg}");
            }
            Err(msg) => {
                eprintln!("error: {msg}");
            }
        }
    }

    if let Err(e) = engine.close() {
        eprintln!("error closing engine: {e}");
        std::process::exit(1);
    }
}
