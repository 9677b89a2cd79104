//! Target hosts.
//!
//! Hosts are read from standard input as whitespace or newline separated
//! names. Order is preserved and duplicates are kept: a host listed twice
//! gets two jobs.

use std::io::{self, Read};

/// Splits the input into hostnames.
pub fn parse_hosts(input: &str) -> Vec<String> {
    input.split_whitespace().map(str::to_owned).collect()
}

/// Reads the whole stream once and parses it into hostnames.
pub fn read_hosts<R: Read>(mut reader: R) -> io::Result<Vec<String>> {
    let mut input = String::new();
    reader.read_to_string(&mut input)?;
    Ok(parse_hosts(&input))
}
