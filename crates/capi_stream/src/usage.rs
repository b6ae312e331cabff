//! Argument classification and usage text

use capi_core::LogSink;

const HELP_TOKENS: [&str; 4] = ["help", "-h", "/?", "--help"];

/// What the positional argument asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Host(String),
    Discover,
    Help,
}

pub fn classify(arg: Option<&str>) -> Target {
    match arg.map(str::trim) {
        None | Some("") => Target::Discover,
        Some(token) if HELP_TOKENS.contains(&token) => Target::Help,
        Some(host) => Target::Host(host.to_string()),
    }
}

pub fn usage_lines(program: &str) -> Vec<String> {
    vec![
        String::new(),
        format!("usage: {} [<hostname>]", program),
        "where:".to_string(),
        "\t<hostname>\t(optional) The measurement device's hostname, IP address.".to_string(),
        "example hostnames:".to_string(),
        "\tConnecting to device by IP address: 169.254.8.50".to_string(),
        "\tConnecting to device by hostname: P9-B0103.local".to_string(),
    ]
}

pub fn print_usage(log: &dyn LogSink, program: &str) {
    for line in usage_lines(program) {
        log.log(&line);
    }
}
