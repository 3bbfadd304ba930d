use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedSample {
    Valid { virtual_kb: u64, resident_kb: u64 },
    Unparseable { reason: String },
}

/// Parses the probe's `"<virtual_kb> <resident_kb>"` line. Tokens past the second are ignored.
pub fn parse_sample_line(line: &str) -> ParsedSample {
    match parse_pair(line.trim()) {
        Ok((virtual_kb, resident_kb)) => ParsedSample::Valid {
            virtual_kb,
            resident_kb,
        },
        Err(reason) => {
            warn!(line = %line, reason = %reason, "unparseable pmap sample");
            ParsedSample::Unparseable { reason }
        }
    }
}

fn parse_pair(line: &str) -> Result<(u64, u64), String> {
    let mut parts = line.split_whitespace();
    let (Some(first), Some(second)) = (parts.next(), parts.next()) else {
        return Err("expected two whitespace-separated integers".to_string());
    };
    let virtual_kb = first
        .parse::<u64>()
        .map_err(|err| format!("invalid virtual size {first:?}: {err}"))?;
    let resident_kb = second
        .parse::<u64>()
        .map_err(|err| format!("invalid resident size {second:?}: {err}"))?;
    Ok((virtual_kb, resident_kb))
}
