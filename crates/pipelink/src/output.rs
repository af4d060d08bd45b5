use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ReplyOutput<'a> {
    endpoint: &'a str,
    code: i32,
    elapsed_ms: u128,
    value: &'a Option<Value>,
}

/// Print a successful reply from `endpoint`.
pub fn print_reply(endpoint: &str, value: &Option<Value>, elapsed_ms: u128, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ReplyOutput {
                endpoint,
                code: pipelink_frame::CODE_OK,
                elapsed_ms,
                value,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ENDPOINT", "CODE", "ELAPSED", "VALUE"])
                .add_row(vec![
                    endpoint.to_string(),
                    pipelink_frame::CODE_OK.to_string(),
                    format!("{elapsed_ms}ms"),
                    value_preview(value),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => match value {
            Some(value) => println!(
                "{}",
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            ),
            None => println!("(no value)"),
        },
        OutputFormat::Raw => {
            if let Some(value) = value {
                print_raw(value.to_string().as_bytes());
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn value_preview(value: &Option<Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => "-".to_string(),
    }
}
