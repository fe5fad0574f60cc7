//! CSV sequence parser

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ErrorKind, ReaderBuilder, StringRecord, Trim};

use super::{
    RowError, RowErrorKind, Sequence, SequenceError, SequenceFormat, SequenceStep,
};
use crate::map::{RelayMap, RelayState};

/// Load and validate a sequence file
pub fn load_sequence(
    path: impl AsRef<Path>,
    map: &RelayMap,
    format: &SequenceFormat,
) -> Result<Sequence, SequenceError> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| SequenceError::Io(format!("{}: {}", path.display(), e)))?;
    parse_sequence(file, &path.display().to_string(), map, format)
}

/// Parse and validate a sequence from any reader
///
/// Returns [`SequenceError::Schema`] when the header does not match or the
/// input is not UTF-8, and [`SequenceError::Rows`] listing every malformed
/// row otherwise.
pub fn parse_sequence<R: Read>(
    reader: R,
    source: &str,
    map: &RelayMap,
    format: &SequenceFormat,
) -> Result<Sequence, SequenceError> {
    let mut csv = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .from_reader(reader);

    let mut header_pending = format.header;
    let mut steps = Vec::new();
    let mut errors = Vec::new();
    let mut row_count = 0u64;
    let mut record = StringRecord::new();

    loop {
        match csv.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => return Err(read_error(e)),
        }
        let row = record.position().map_or(0, |pos| pos.line());

        if header_pending {
            check_header(&record, format)?;
            header_pending = false;
            continue;
        }

        row_count += 1;
        match parse_row(&record, row, map, format) {
            Ok(step) => steps.push(step),
            Err(mut row_errors) => errors.append(&mut row_errors),
        }
    }

    if header_pending {
        return Err(SequenceError::Schema("missing header row".into()));
    }
    if !errors.is_empty() {
        return Err(SequenceError::Rows(errors));
    }

    log::debug!("Parsed {} step(s) from {}", steps.len(), source);
    Ok(Sequence {
        source: source.to_string(),
        steps,
        row_count,
    })
}

fn read_error(e: csv::Error) -> SequenceError {
    match e.kind() {
        ErrorKind::Utf8 { pos, .. } => SequenceError::Schema(match pos {
            Some(pos) => format!("line {} is not valid UTF-8", pos.line()),
            None => "input is not valid UTF-8".into(),
        }),
        _ => SequenceError::Io(e.to_string()),
    }
}

fn check_header(record: &StringRecord, format: &SequenceFormat) -> Result<(), SequenceError> {
    let fields: Vec<&str> = record.iter().collect();
    let matches = (2..=3).contains(&fields.len())
        && fields
            .iter()
            .zip(format.columns.iter())
            .all(|(found, expected)| found.eq_ignore_ascii_case(expected));
    if matches {
        Ok(())
    } else {
        Err(SequenceError::Schema(format!(
            "expected header '{}', found '{}'",
            format.columns.join(","),
            fields.join(",")
        )))
    }
}

fn parse_row(
    record: &StringRecord,
    row: u64,
    map: &RelayMap,
    format: &SequenceFormat,
) -> Result<SequenceStep, Vec<RowError>> {
    let error = |kind| RowError { row, kind };

    if !(2..=3).contains(&record.len()) {
        return Err(vec![error(RowErrorKind::FieldCount {
            found: record.len(),
        })]);
    }

    let mut errors = Vec::new();

    let relay_field = record.get(0).unwrap_or_default();
    let relay = if relay_field.is_empty() {
        errors.push(error(RowErrorKind::MissingField("relay")));
        None
    } else {
        match map.lookup(relay_field) {
            Some(relay) => Some(relay.id.clone()),
            None => {
                errors.push(error(RowErrorKind::UnknownRelay(relay_field.to_string())));
                None
            }
        }
    };

    let state_field = record.get(1).unwrap_or_default();
    let state = if state_field.is_empty() {
        errors.push(error(RowErrorKind::MissingField("state")));
        None
    } else {
        match state_field.parse::<RelayState>() {
            Ok(state) => Some(state),
            Err(_) => {
                errors.push(error(RowErrorKind::InvalidState(state_field.to_string())));
                None
            }
        }
    };

    let delay = match record.get(2).filter(|field| !field.is_empty()) {
        None => None,
        Some(field) => {
            let duration = field
                .parse::<f64>()
                .ok()
                .and_then(|value| format.delay_unit.to_duration(value));
            if duration.is_none() {
                errors.push(error(RowErrorKind::InvalidDelay(field.to_string())));
            }
            duration
        }
    };

    match (relay, state) {
        (Some(relay), Some(state)) if errors.is_empty() => Ok(SequenceStep {
            row,
            relay,
            state,
            delay,
        }),
        _ => Err(errors),
    }
}
