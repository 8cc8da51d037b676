//! SCPI header parsing and mnemonic matching
//!
//! A table header such as `MEASure:VOLTage?` accepts every node in either
//! its short form (the uppercase part, `MEAS`) or its long form
//! (`MEASURE`), case-insensitively. Optional nodes are written in brackets:
//! `SYSTem:ERRor[:NEXT]?`.

/// Whether a header is a query or a plain command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Query,
    Write,
}

/// A command split into header and argument text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand<'a> {
    pub header: &'a str,
    pub kind: CommandKind,
    pub args: &'a str,
}

/// Split `command` at the first whitespace into header and arguments
pub fn parse_command(command: &str) -> Option<ParsedCommand<'_>> {
    let command = command.trim();
    if command.is_empty() {
        return None;
    }
    let (header, args) = match command.find(char::is_whitespace) {
        Some(idx) => (&command[..idx], command[idx..].trim()),
        None => (command, ""),
    };
    let (header, kind) = match header.strip_suffix('?') {
        Some(stripped) => (stripped, CommandKind::Query),
        None => (header, CommandKind::Write),
    };
    Some(ParsedCommand {
        header: header.strip_prefix(':').unwrap_or(header),
        kind,
        args,
    })
}

/// Match an input header (without `?`) against a table pattern (without `?`)
pub fn header_matches(pattern: &str, input: &str) -> bool {
    let input: Vec<&str> = input.split(':').collect();
    let nodes = pattern_nodes(pattern);
    match_nodes(&nodes, &input)
}

struct PatternNode<'a> {
    mnemonic: &'a str,
    optional: bool,
}

fn pattern_nodes(pattern: &str) -> Vec<PatternNode<'_>> {
    let mut nodes = Vec::new();
    let mut rest = pattern;
    while !rest.is_empty() {
        if let Some(inner) = rest.strip_prefix('[') {
            let end = inner.find(']').unwrap_or(inner.len());
            let mnemonic = inner[..end].trim_start_matches(':');
            nodes.push(PatternNode {
                mnemonic,
                optional: true,
            });
            rest = inner.get(end + 1..).unwrap_or("");
        } else {
            let rest_trimmed = rest.trim_start_matches(':');
            let end = rest_trimmed
                .find([':', '['])
                .unwrap_or(rest_trimmed.len());
            nodes.push(PatternNode {
                mnemonic: &rest_trimmed[..end],
                optional: false,
            });
            rest = &rest_trimmed[end..];
        }
    }
    nodes
}

fn match_nodes(nodes: &[PatternNode<'_>], input: &[&str]) -> bool {
    match (nodes.split_first(), input.split_first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some((node, rest)), None) => node.optional && match_nodes(rest, input),
        (Some((node, rest_nodes)), Some((token, rest_input))) => {
            (mnemonic_matches(node.mnemonic, token) && match_nodes(rest_nodes, rest_input))
                || (node.optional && match_nodes(rest_nodes, input))
        }
    }
}

/// Compare one node, accepting the short or long form
pub fn mnemonic_matches(mnemonic: &str, token: &str) -> bool {
    let short: String = mnemonic
        .chars()
        .filter(|c| !c.is_ascii_lowercase())
        .collect();
    token.eq_ignore_ascii_case(mnemonic) || token.eq_ignore_ascii_case(&short)
}

/// Parse an IEEE 488.2 numeric argument
pub fn parse_number(args: &str) -> Option<f64> {
    let value = args.split(',').next()?.trim();
    match value.to_ascii_uppercase().as_str() {
        "" => None,
        "ON" => Some(1.0),
        "OFF" => Some(0.0),
        _ => value.parse().ok(),
    }
}
