//! Plain-text CSV exchange: one record per line, five fields in record order
//! (name, host, username, password, comment), no header row.

use std::io::{Read, Write};

use ypw_core::{PasswordField, PasswordRecord};

pub(crate) const FIELD_COUNT: usize = PasswordField::ALL.len();

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RejectedLine {
    pub line: u64,
    pub reason: String,
}

#[derive(Debug, Default)]
pub(crate) struct ImportReport {
    pub records: Vec<PasswordRecord>,
    pub rejected: Vec<RejectedLine>,
    /// Lines whose values were cut to fit the field widths.
    pub truncated: Vec<u64>,
}

pub(crate) fn read_records<R: Read>(input: R, separator: u8) -> Result<ImportReport, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(separator)
        .from_reader(input);

    let mut report = ImportReport::default();
    let mut row = csv::ByteRecord::new();
    let mut widest = 0;
    let outcome = collect_rows(&mut reader, &mut row, &mut widest, &mut report);
    scrub(&mut row, widest);
    outcome?;
    Ok(report)
}

fn collect_rows<R: Read>(
    reader: &mut csv::Reader<R>,
    row: &mut csv::ByteRecord,
    widest: &mut usize,
    report: &mut ImportReport,
) -> Result<(), csv::Error> {
    while reader.read_byte_record(row)? {
        *widest = (*widest).max(row.as_slice().len());
        let line = row.position().map_or(0, |position| position.line());
        if row.len() != FIELD_COUNT {
            report.rejected.push(RejectedLine {
                line,
                reason: format!("expected {FIELD_COUNT} fields, found {}", row.len()),
            });
            continue;
        }

        let mut record = PasswordRecord::new();
        let mut cut = false;
        for (field, value) in PasswordField::ALL.into_iter().zip(row.iter()) {
            cut |= value.len() > field.width();
            record.set(field, value);
        }
        if record.name().is_empty() {
            report.rejected.push(RejectedLine {
                line,
                reason: "empty name".to_owned(),
            });
            continue;
        }
        if cut {
            report.truncated.push(line);
        }
        report.records.push(record);
    }
    Ok(())
}

pub(crate) fn write_records<W: Write>(
    output: W,
    separator: u8,
    records: &[PasswordRecord],
) -> Result<(), csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(separator)
        .from_writer(output);

    let mut row = csv::ByteRecord::new();
    let mut widest = 0;
    let mut written = Ok(());
    for record in records {
        row.clear();
        for field in PasswordField::ALL {
            row.push_field(record.get(field));
        }
        widest = widest.max(row.as_slice().len());
        written = writer.write_byte_record(&row);
        if written.is_err() {
            break;
        }
    }
    scrub(&mut row, widest);
    written?;
    writer.flush()?;
    Ok(())
}

/// Overwrites the field storage of a reused record with zeros. `clear` only
/// resets the length; pushing one field as long as the widest row seen
/// rewrites the same allocation from the start.
fn scrub(row: &mut csv::ByteRecord, widest: usize) {
    row.clear();
    row.push_field(&vec![0_u8; widest]);
    row.clear();
}

#[cfg(test)]
mod tests {
    use ypw_core::password_record::NAME_SIZE;
    use ypw_core::PasswordRecord;

    use super::{read_records, scrub, write_records};

    #[test]
    fn well_formed_lines_become_records() {
        let input = b"mail,imap.example.org,alice,s3cret,work account\nbank,,bob,pin,\n";
        let report = read_records(&input[..], b',').expect("parse");

        assert!(report.rejected.is_empty());
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[0].host(), b"imap.example.org");
        assert_eq!(report.records[0].comment(), b"work account");
        assert_eq!(report.records[1].name(), b"bank");
        assert_eq!(report.records[1].host(), b"");
    }

    #[test]
    fn wrong_field_count_is_reported_by_line() {
        let input = b"ok,h,u,p,c\ntoo,few\ntoo,many,f,i,e,l,d\n,h,u,p,c\n";
        let report = read_records(&input[..], b',').expect("parse");

        assert_eq!(report.records.len(), 1);
        let lines: Vec<u64> = report.rejected.iter().map(|rejected| rejected.line).collect();
        assert_eq!(lines, vec![2, 3, 4]);
        assert_eq!(report.rejected[0].reason, "expected 5 fields, found 2");
        assert_eq!(report.rejected[2].reason, "empty name");
    }

    #[test]
    fn oversized_values_are_cut_to_width() {
        let long_name = "n".repeat(NAME_SIZE + 10);
        let input = format!("{long_name};h;u;p;c\n");
        let report = read_records(input.as_bytes(), b';').expect("parse");

        assert_eq!(report.truncated, vec![1]);
        assert_eq!(report.records[0].name().len(), NAME_SIZE);
    }

    #[test]
    fn export_quotes_separators_inside_values() {
        let records = [PasswordRecord::with_fields(
            b"router",
            b"192.168.0.1",
            b"admin",
            b"a,b",
            b"",
        )];
        let mut output = Vec::new();
        write_records(&mut output, b',', &records).expect("write");
        assert_eq!(output, b"router,192.168.0.1,admin,\"a,b\",\n");

        let report = read_records(&output[..], b',').expect("parse back");
        assert_eq!(report.records[0].password(), b"a,b");
    }

    #[test]
    fn scrubbed_row_is_zeroed_and_reusable() {
        let mut row = csv::ByteRecord::from(vec!["name", "hunter2"]);
        let widest = row.as_slice().len();
        scrub(&mut row, widest);
        assert!(row.is_empty());

        row.push_field(&vec![0_u8; widest]);
        assert!(row.as_slice().iter().all(|byte| *byte == 0));

        let input = b"a,h,u,a-long-password,c\nb,h,u,p,c\n";
        let report = read_records(&input[..], b',').expect("parse");
        assert_eq!(report.records[0].password(), b"a-long-password");
        assert_eq!(report.records[1].password(), b"p");
    }
}
