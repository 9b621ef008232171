//! CSV bulk-file source.

use crate::normalize::{normalize, RawRecord};
use crate::{EventSource, SourceError, SourceResult};
use admill_model::RawEvent;
use csv::StringRecord;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Source column positions resolved from the header row.
struct ColumnIndex {
    event_id: usize,
    user_id: usize,
    advertiser_name: usize,
    campaign_name: usize,
    device: usize,
    location: usize,
    timestamp: usize,
    bid_amount: usize,
    ad_cost: usize,
    was_clicked: usize,
    click_timestamp: usize,
    ad_revenue: usize,
    ad_slot_size: usize,
    targeting_country: usize,
    targeting_interest: usize,
    targeting_criteria: usize,
    campaign_start: Option<usize>,
    campaign_end: Option<usize>,
}

impl ColumnIndex {
    fn from_headers(headers: &StringRecord) -> SourceResult<Self> {
        let find = |name: &str| -> Option<usize> {
            headers.iter().position(|header| header.trim() == name)
        };
        let require = |name: &'static str| -> SourceResult<usize> {
            find(name).ok_or_else(|| SourceError::MissingColumn(name.to_string()))
        };

        Ok(Self {
            event_id: require("EventID")?,
            user_id: require("UserID")?,
            advertiser_name: require("AdvertiserName")?,
            campaign_name: require("CampaignName")?,
            device: require("Device")?,
            location: require("Location")?,
            timestamp: require("Timestamp")?,
            bid_amount: require("BidAmount")?,
            ad_cost: require("AdCost")?,
            was_clicked: require("WasClicked")?,
            click_timestamp: require("ClickTimestamp")?,
            ad_revenue: require("AdRevenue")?,
            ad_slot_size: require("AdSlotSize")?,
            targeting_country: require("CampaignTargetingCountry")?,
            targeting_interest: require("CampaignTargetingInterest")?,
            targeting_criteria: require("CampaignTargetingCriteria")?,
            // Present in full exports, absent in minimal ones.
            campaign_start: find("CampaignStartDate"),
            campaign_end: find("CampaignEndDate"),
        })
    }

    fn record(&self, row: &StringRecord) -> RawRecord {
        let get = |index: usize| row.get(index).unwrap_or_default().to_string();
        let get_opt = |index: Option<usize>| {
            index
                .and_then(|i| row.get(i))
                .unwrap_or_default()
                .to_string()
        };
        RawRecord {
            event_id: get(self.event_id),
            user_id: get(self.user_id),
            advertiser_name: get(self.advertiser_name),
            campaign_name: get(self.campaign_name),
            device: get(self.device),
            location: get(self.location),
            timestamp: get(self.timestamp),
            bid_amount: get(self.bid_amount),
            ad_cost: get(self.ad_cost),
            was_clicked: get(self.was_clicked),
            click_timestamp: get(self.click_timestamp),
            ad_revenue: get(self.ad_revenue),
            ad_slot_size: get(self.ad_slot_size),
            targeting_country: get(self.targeting_country),
            targeting_interest: get(self.targeting_interest),
            targeting_criteria: get(self.targeting_criteria),
            campaign_start: get_opt(self.campaign_start),
            campaign_end: get_opt(self.campaign_end),
        }
    }
}

/// Reads a delimited event export in bounded chunks.
pub struct CsvEventSource {
    path: PathBuf,
    reader: csv::Reader<File>,
    columns: ColumnIndex,
    chunk_size: usize,
    row: u64,
    rows_skipped: u64,
    done: bool,
}

impl CsvEventSource {
    pub fn open(path: impl AsRef<Path>, separator: u8, chunk_size: usize) -> SourceResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| SourceError::Unavailable {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(separator)
            .flexible(true)
            .from_reader(file);
        let columns = ColumnIndex::from_headers(reader.headers()?)?;
        debug!("Opened CSV source: {}", path.display());
        Ok(Self {
            path,
            reader,
            columns,
            chunk_size: chunk_size.max(1),
            row: 0,
            rows_skipped: 0,
            done: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSource for CsvEventSource {
    fn next_chunk(&mut self) -> SourceResult<Option<Vec<RawEvent>>> {
        if self.done {
            return Ok(None);
        }

        let mut chunk = Vec::with_capacity(self.chunk_size);
        let mut record = StringRecord::new();
        while chunk.len() < self.chunk_size {
            if !self.reader.read_record(&mut record)? {
                self.done = true;
                break;
            }
            self.row += 1;
            match normalize(&self.columns.record(&record)) {
                Ok(event) => chunk.push(event),
                Err(err) => {
                    self.rows_skipped += 1;
                    warn!(row = self.row, "Skipping malformed row: {}", err);
                }
            }
        }

        if chunk.is_empty() && self.done {
            Ok(None)
        } else {
            Ok(Some(chunk))
        }
    }

    fn rows_skipped(&self) -> u64 {
        self.rows_skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_all;
    use std::io::Write;

    const HEADER: &str = "EventID,UserID,AdvertiserName,CampaignName,Device,Location,Timestamp,BidAmount,AdCost,WasClicked,ClickTimestamp,AdRevenue,AdSlotSize,CampaignTargetingCountry,CampaignTargetingInterest,CampaignTargetingCriteria";

    fn write_csv(rows: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", HEADER).unwrap();
        for row in rows {
            writeln!(file, "{}", row).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn reads_valid_rows_in_order() {
        let file = write_csv(&[
            "e1,1,Acme,C_1,mobile,Kyiv,2024-06-01 10:00:00,1.00,2.00,False,,,300x250,UA,,",
            "e2,1,Acme,C_1,mobile,Kyiv,2024-06-01 10:05:00,1.00,2.00,True,2024-06-01 10:05:03,5.00,300x250,UA,,",
        ]);
        let mut source = CsvEventSource::open(file.path(), b',', 100).unwrap();
        let outcome = read_all(&mut source).unwrap();
        assert_eq!(outcome.events.len(), 2);
        assert_eq!(outcome.rows_skipped, 0);
        assert_eq!(outcome.events[0].event_id, "e1");
        assert!(outcome.events[1].was_clicked);
    }

    #[test]
    fn chunks_are_bounded() {
        let rows: Vec<String> = (0..5)
            .map(|i| {
                format!(
                    "e{i},1,Acme,C_1,mobile,Kyiv,2024-06-01 10:0{i}:00,1.00,2.00,False,,,300x250,UA,,"
                )
            })
            .collect();
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        let file = write_csv(&refs);
        let mut source = CsvEventSource::open(file.path(), b',', 2).unwrap();

        let mut sizes = Vec::new();
        while let Some(chunk) = source.next_chunk().unwrap() {
            sizes.push(chunk.len());
        }
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn malformed_rows_are_skipped_and_counted() {
        let file = write_csv(&[
            "e1,1,Acme,C_1,mobile,Kyiv,not-a-time,1.00,2.00,False,,,300x250,UA,,",
            "e2,1,Acme,C_1,mobile,Kyiv,2024-06-01 10:05:00,1.00,2.00,False,,,300x250,UA,,",
            "e3,1,Acme,C_1,mobile,Kyiv,2024-06-01 10:06:00,1.00,two,False,,,300x250,UA,,",
        ]);
        let mut source = CsvEventSource::open(file.path(), b',', 100).unwrap();
        let outcome = read_all(&mut source).unwrap();
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.rows_skipped, 2);
        assert_eq!(outcome.events[0].event_id, "e2");
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "EventID,UserID").unwrap();
        writeln!(file, "e1,1").unwrap();
        let err = CsvEventSource::open(file.path(), b',', 100).unwrap_err();
        assert!(matches!(err, SourceError::MissingColumn(_)));
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = CsvEventSource::open("/does/not/exist.csv", b',', 100).unwrap_err();
        assert!(matches!(err, SourceError::Unavailable { .. }));
    }

    #[test]
    fn respects_alternate_separator() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", HEADER.replace(',', ";")).unwrap();
        writeln!(
            file,
            "e1;1;Acme;C_1;mobile;Kyiv;2024-06-01 10:00:00;1.00;2.00;False;;;300x250;UA;;"
        )
        .unwrap();
        let mut source = CsvEventSource::open(file.path(), b';', 100).unwrap();
        let outcome = read_all(&mut source).unwrap();
        assert_eq!(outcome.events.len(), 1);
    }
}
