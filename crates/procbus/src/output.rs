use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use procbus_frame::MessageId;
use procbus_routing::{Address, Rule};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
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
struct MessageOutput<'a> {
    message_id: String,
    source: String,
    destination: &'a str,
    payload_size: usize,
    payload: String,
}

/// Print one received stream.
pub fn print_message(id: MessageId, destination: &str, payload: &[u8], format: OutputFormat) {
    let (node, process, _) = id.split();
    let source = Address::new(node, process).to_string();

    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                message_id: id.to_string(),
                source,
                destination,
                payload_size: payload.len(),
                payload: payload_preview(payload),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["MESSAGE", "SOURCE", "DESTINATION", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    id.to_string(),
                    source,
                    destination.to_string(),
                    payload.len().to_string(),
                    payload_preview(payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "message={id} source={source} destination={destination} size={} payload={}",
                payload.len(),
                payload_preview(payload)
            );
        }
        OutputFormat::Raw => print_raw(payload),
    }
}

#[derive(Serialize)]
pub struct SentOutput<'a> {
    pub message_id: String,
    pub destination: &'a str,
    pub bytes: usize,
}

pub fn print_sent(out: &SentOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["MESSAGE", "DESTINATION", "BYTES"])
                .add_row(vec![
                    out.message_id.clone(),
                    out.destination.to_string(),
                    out.bytes.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!(
                "sent message={} destination={} bytes={}",
                out.message_id, out.destination, out.bytes
            );
        }
    }
}

#[derive(Serialize)]
pub struct RouteOutput {
    pub destination: String,
    pub targets: Vec<Address>,
}

pub fn print_routes(routes: &[RouteOutput], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&routes),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DESTINATION", "TARGETS"]);
            for route in routes {
                table.add_row(vec![route.destination.clone(), join(&route.targets)]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for route in routes {
                println!("{} -> {}", route.destination, join(&route.targets));
            }
        }
    }
}

#[derive(Serialize)]
struct RuleOutput<'a> {
    prefix: &'a str,
    rule: &'a Rule,
}

pub fn print_rules(rules: &[(String, Rule)], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out: Vec<RuleOutput<'_>> = rules
                .iter()
                .map(|(prefix, rule)| RuleOutput { prefix, rule })
                .collect();
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PREFIX", "KIND", "TARGETS"]);
            for (prefix, rule) in rules {
                table.add_row(vec![prefix.clone(), rule_kind(rule), rule_targets(rule)]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for (prefix, rule) in rules {
                println!("{prefix} {} {}", rule_kind(rule), rule_targets(rule));
            }
        }
    }
}

#[derive(Serialize)]
pub struct ReadyOutput {
    pub listen: String,
    pub node_id: u32,
    pub rules: usize,
}

pub fn print_ready(out: &ReadyOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        _ => println!(
            "listening on {} (node {}, {} rules)",
            out.listen, out.node_id, out.rules
        ),
    }
    let _ = std::io::stdout().flush();
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn rule_kind(rule: &Rule) -> String {
    match rule {
        Rule::Simple(_) => "simple".to_string(),
        Rule::Sharded(_) => "sharded".to_string(),
    }
}

fn rule_targets(rule: &Rule) -> String {
    match rule {
        Rule::Simple(simple) => join(&simple.targets),
        Rule::Sharded(sharded) => sharded
            .entries()
            .iter()
            .map(|entry| format!("[{}..{}] {}", entry.from, entry.to, join(&entry.targets)))
            .collect::<Vec<_>>()
            .join("; "),
    }
}

fn join(addresses: &[Address]) -> String {
    if addresses.is_empty() {
        return "-".to_string();
    }
    addresses
        .iter()
        .map(Address::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}
