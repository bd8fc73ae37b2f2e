//! Tax-tool CSV layout
//!
//! One fixed column order per record kind, `\n` line endings, header first.

use anyhow::{Context, Result};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use tracing::debug;

use crate::types::{format_timestamp, PerpRecord, Record, RecordKind, SpotRecord};

pub const SPOT_COLUMNS: [&str; 9] = [
    "timestamp", "chain", "asset", "side", "quantity", "price", "total", "fees", "hash",
];

pub const PERP_COLUMNS: [&str; 14] = [
    "timestamp",
    "asset",
    "side",
    "quantity",
    "entry_price",
    "exit_price",
    "pnl",
    "fees",
    "funding",
    "exchange",
    "leverage",
    "liquidation",
    "chain",
    "hash",
];

pub fn columns(kind: RecordKind) -> &'static [&'static str] {
    match kind {
        RecordKind::Spot => &SPOT_COLUMNS,
        RecordKind::Perp => &PERP_COLUMNS,
    }
}

/// Natural decimal representation, no fixed precision
fn num(value: f64) -> String {
    value.to_string()
}

fn opt_num(value: Option<f64>, absent: &str) -> String {
    value.map(num).unwrap_or_else(|| absent.to_string())
}

pub fn spot_row(r: &SpotRecord) -> Vec<String> {
    vec![
        format_timestamp(&r.timestamp),
        r.chain.clone(),
        r.asset.clone(),
        r.side.to_string(),
        num(r.quantity),
        opt_num(r.price, "0"),
        opt_num(r.total, "0"),
        num(r.fees),
        r.hash.clone(),
    ]
}

pub fn perp_row(r: &PerpRecord) -> Vec<String> {
    vec![
        format_timestamp(&r.timestamp),
        r.asset.clone(),
        r.side.to_string(),
        num(r.quantity),
        num(r.entry_price),
        opt_num(r.exit_price(), ""),
        opt_num(r.pnl(), ""),
        num(r.fees),
        num(r.funding),
        r.exchange.clone(),
        opt_num(r.leverage, "0"),
        if r.liquidation { "YES" } else { "NO" }.to_string(),
        r.chain.clone(),
        r.hash.clone(),
    ]
}

/// Serialize records of `kind` to CSV
///
/// Records of the other kind are not part of this export and are skipped.
/// Fields containing a delimiter or quote are quoted.
pub fn to_csv(records: &[Record], kind: RecordKind) -> Result<String> {
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .quote_style(QuoteStyle::Necessary)
        .from_writer(Vec::new());

    writer
        .write_record(columns(kind))
        .context("Failed to write CSV header")?;

    let mut skipped = 0usize;
    for record in records {
        let row = match (kind, record) {
            (RecordKind::Spot, Record::Spot(r)) => spot_row(r),
            (RecordKind::Perp, Record::Perp(r)) => perp_row(r),
            _ => {
                skipped += 1;
                continue;
            }
        };
        writer.write_record(&row).context("Failed to write CSV row")?;
    }

    if skipped > 0 {
        debug!("Skipped {} records not of kind {}", skipped, kind);
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV writer: {}", e))?;
    String::from_utf8(bytes).context("CSV output was not UTF-8")
}

/// `<type>-export-<first 8 chars of account>.csv`
pub fn export_filename(kind: RecordKind, account: &str) -> String {
    let prefix: String = account.chars().take(8).collect();
    format!("{}-export-{}.csv", kind, prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::*;
    use crate::types::SpotSide;

    fn parse_rows(csv_text: &str) -> (Vec<String>, Vec<Vec<String>>) {
        let mut reader = csv::Reader::from_reader(csv_text.as_bytes());
        let header = reader
            .headers()
            .unwrap()
            .iter()
            .map(str::to_string)
            .collect();
        let rows = reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect();
        (header, rows)
    }

    #[test]
    fn test_empty_perp_is_header_only() {
        let out = to_csv(&[], RecordKind::Perp).unwrap();
        assert_eq!(
            out,
            "timestamp,asset,side,quantity,entry_price,exit_price,pnl,fees,funding,exchange,leverage,liquidation,chain,hash\n"
        );
    }

    #[test]
    fn test_empty_spot_is_header_only() {
        let out = to_csv(&[], RecordKind::Spot).unwrap();
        assert_eq!(out, "timestamp,chain,asset,side,quantity,price,total,fees,hash\n");
    }

    #[test]
    fn test_spot_row_layout() {
        let records = vec![spot(1_714_564_800, "BONK", SpotSide::Buy, 10.0, 0.1, "5xSig")];
        let out = to_csv(&records, RecordKind::Spot).unwrap();
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "2024-05-01T12:00:00.000Z,solana,BONK,BUY,10,0.1,1,0.000005,5xSig");
        assert!(out.ends_with('\n'));
        assert!(!out.contains('\r'));
    }

    #[test]
    fn test_perp_open_and_closed_rows() {
        let mut liquidated = perp(1_714_564_800, "ETH", -2.0, 3000.0, Some((3300.0, -600.0)), "p2");
        if let Record::Perp(r) = &mut liquidated {
            r.liquidation = true;
            r.leverage = None;
        }
        let records = vec![perp(1_714_564_800, "BTC", 0.5, 60000.0, None, "p1"), liquidated];
        let out = to_csv(&records, RecordKind::Perp).unwrap();
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(
            lines[1],
            "2024-05-01T12:00:00.000Z,BTC,LONG,0.5,60000,,,1.5,-0.25,Hyperliquid,5,NO,hyperliquid,p1"
        );
        assert_eq!(
            lines[2],
            "2024-05-01T12:00:00.000Z,ETH,SHORT,2,3000,3300,-600,1.5,-0.25,Hyperliquid,0,YES,hyperliquid,p2"
        );
    }

    #[test]
    fn test_unpriced_spot_writes_zero() {
        let record = SpotRecord::derived(at(0), "solana", "SOL", SpotSide::TransferIn, 1.5, None, 0.0, "h");
        let row = spot_row(&record);
        assert_eq!(row[5], "0");
        assert_eq!(row[6], "0");
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let records = vec![
            spot(1_714_564_800, "SOL", SpotSide::Sell, 1.25, 150.5, "sig-a"),
            spot(1_714_478_400, "JUP", SpotSide::Buy, 300.0, 0.0042, "sig-b"),
            spot(1_714_392_000, "BONK", SpotSide::TransferOut, 1e6, 0.00002, "sig-c"),
        ];
        let out = to_csv(&records, RecordKind::Spot).unwrap();
        let (header, rows) = parse_rows(&out);

        assert_eq!(header, SPOT_COLUMNS);
        let expected: Vec<Vec<String>> = records
            .iter()
            .map(|r| match r {
                Record::Spot(s) => spot_row(s),
                Record::Perp(_) => unreachable!(),
            })
            .collect();
        assert_eq!(rows, expected);
    }

    #[test]
    fn test_commas_are_quoted() {
        let records = vec![spot(0, "WEIRD,TOKEN", SpotSide::Buy, 1.0, 1.0, "h")];
        let out = to_csv(&records, RecordKind::Spot).unwrap();
        assert!(out.contains("\"WEIRD,TOKEN\""));

        let (_, rows) = parse_rows(&out);
        assert_eq!(rows[0][2], "WEIRD,TOKEN");
    }

    #[test]
    fn test_other_kind_is_skipped() {
        let records = vec![perp(0, "BTC", 1.0, 1.0, None, "p")];
        let out = to_csv(&records, RecordKind::Spot).unwrap();
        assert_eq!(out.lines().count(), 1);
    }

    #[test]
    fn test_export_filename() {
        assert_eq!(
            export_filename(RecordKind::Spot, "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU"),
            "spot-export-7xKXtg2C.csv"
        );
        assert_eq!(export_filename(RecordKind::Perp, "0xabc"), "perp-export-0xabc.csv");
    }
}
