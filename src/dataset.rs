//! Data-set loading and round-robin partitioning across ranks.
//!
//! The input is a plain-text matrix: one record per line, whitespace
//! separated doubles, the first line fixing the number of columns. Every
//! rank scans the whole file once, keeps the lines the partitioning
//! function assigns to it and counts the rest, so no rank ever holds more
//! than its share in memory. The global mean of all values is computed in
//! the same pass from per-rank partial sums and one all-sum.

use crate::error::{LatticaError, Result};
use crate::parallel::{distribute, Communicator};
use log::{debug, warn};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// A data set of fixed-length records distributed among ranks.
///
/// Records keep their integer identity: the *global index* is the record's
/// 0-based position in the input file, the *local index* its position in
/// this rank's store. The two are related by pure arithmetic, see
/// [`Dataset::global_to_local`].
#[derive(Debug)]
pub struct Dataset {
    batch_size: usize,
    local_batch_size: usize,
    total_records: usize,
    local_records: usize,
    dimensions: usize,
    value_mean: f64,
    rank: usize,
    ranks: usize,
    data: Vec<f64>,
}

impl Dataset {
    /// Loads the file at `path`, keeping this rank's share of the records.
    ///
    /// `batch_size` is the requested global batch size; 0, or any value
    /// smaller than the rank count, selects "no batching" and is rewritten
    /// to the total record count. Participates in one collective (the mean
    /// reduction), so every rank of the group must call this together.
    pub fn load(
        path: impl AsRef<Path>,
        batch_size: usize,
        comm: &dyn Communicator,
    ) -> Result<Self> {
        let path = path.as_ref();
        let rank = comm.rank();
        let ranks = comm.ranks();

        let file = File::open(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => LatticaError::DatasetNotFound(path.to_path_buf()),
            _ => LatticaError::Io(err),
        })?;

        // Batch boundaries only matter when at least one record of every
        // batch can land on every rank; anything smaller means one batch
        // spanning the whole file.
        let wrap = if batch_size >= ranks {
            Some(batch_size)
        } else {
            if batch_size > 0 {
                warn!(
                    "batch size {batch_size} is smaller than the rank count {ranks}; \
                     training without batching"
                );
            }
            None
        };

        let mut dimensions = 0usize;
        let mut total_records = 0usize;
        let mut bidx = 0usize;
        let mut rank_sum = 0.0f64;
        let mut values: Vec<f64> = Vec::new();
        let mut first_blank: Option<usize> = None;

        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let line_no = line_no + 1;

            if line.trim().is_empty() {
                if total_records == 0 {
                    return Err(LatticaError::Format {
                        path: path.to_path_buf(),
                        line: line_no,
                        reason: "first line is empty".to_string(),
                    });
                }
                first_blank.get_or_insert(line_no);
                continue;
            }
            if let Some(blank_line) = first_blank {
                return Err(LatticaError::Format {
                    path: path.to_path_buf(),
                    line: blank_line,
                    reason: "empty line between records".to_string(),
                });
            }

            if dimensions == 0 {
                dimensions = line.split_whitespace().count();
            }

            if bidx % ranks == rank {
                let mut fields = 0usize;
                for token in line.split_whitespace() {
                    let value: f64 = token.parse().map_err(|_| LatticaError::Format {
                        path: path.to_path_buf(),
                        line: line_no,
                        reason: format!("cannot parse {token:?} as a double"),
                    })?;
                    values.push(value);
                    rank_sum += value;
                    fields += 1;
                }
                if fields != dimensions {
                    return Err(LatticaError::Format {
                        path: path.to_path_buf(),
                        line: line_no,
                        reason: format!("expected {dimensions} fields, found {fields}"),
                    });
                }
            }

            total_records += 1;
            bidx = match wrap {
                Some(batch) if bidx + 1 >= batch => 0,
                _ => bidx + 1,
            };
        }

        if total_records == 0 {
            return Err(LatticaError::Format {
                path: path.to_path_buf(),
                line: 0,
                reason: "dataset holds no records".to_string(),
            });
        }

        // One collective: stitch the per-rank partial sums into the global
        // mean. The denominator is the record count, so the "mean" spans
        // all columns of a record at once.
        let mut send = comm.alloc_doubles(1);
        let mut recv = comm.alloc_doubles(1);
        send[0] = rank_sum;
        comm.sum_all(&send, &mut recv)?;
        let value_mean = recv[0] / total_records as f64;

        let batch_size = wrap.unwrap_or(total_records);
        let local_batch_size = distribute(batch_size, rank, ranks);
        let local_records = values.len() / dimensions;

        debug!(
            "rank {rank} of {ranks} loaded {local_records} of {total_records} records \
             ({dimensions} columns, batch size {batch_size}, mean {value_mean})"
        );

        Ok(Self {
            batch_size,
            local_batch_size,
            total_records,
            local_records,
            dimensions,
            value_mean,
            rank,
            ranks,
            data: values,
        })
    }

    /// Global batch size: the number of records presented before the
    /// lattice state is updated.
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// This rank's share of one batch.
    #[inline]
    pub fn local_batch_size(&self) -> usize {
        self.local_batch_size
    }

    /// Total number of records across all ranks.
    #[inline]
    pub fn total_records(&self) -> usize {
        self.total_records
    }

    /// Number of records held by this rank.
    #[inline]
    pub fn local_records(&self) -> usize {
        self.local_records
    }

    /// Number of columns per record.
    #[inline]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Arithmetic mean over all parsed values, identical on every rank.
    #[inline]
    pub fn value_mean(&self) -> f64 {
        self.value_mean
    }

    /// The rank this data set was loaded for.
    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// The rank count this data set was partitioned over.
    #[inline]
    pub fn ranks(&self) -> usize {
        self.ranks
    }

    /// The local record at index `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= local_records()`.
    #[inline]
    pub fn local_record(&self, idx: usize) -> &[f64] {
        assert!(
            idx < self.local_records,
            "local record {idx} out of range ({} held)",
            self.local_records
        );
        let offset = idx * self.dimensions;
        &self.data[offset..offset + self.dimensions]
    }

    /// The record with global index `gidx`, if this rank owns it.
    pub fn global_record(&self, gidx: usize) -> Option<&[f64]> {
        let (rank, lidx) = self.global_to_local(gidx);
        (rank == self.rank).then(|| self.local_record(lidx))
    }

    /// Maps a global record index to its owning rank and local index.
    ///
    /// # Panics
    ///
    /// Panics if `gidx >= total_records()`.
    pub fn global_to_local(&self, gidx: usize) -> (usize, usize) {
        assert!(
            gidx < self.total_records,
            "global record {gidx} out of range ({} total)",
            self.total_records
        );
        let batch = gidx / self.batch_size;
        let bidx = gidx % self.batch_size;
        let rank = bidx % self.ranks;
        let rank_batch = distribute(self.batch_size, rank, self.ranks);
        let lidx = batch * rank_batch + bidx / self.ranks;
        (rank, lidx)
    }

    /// Streams this rank's records, one line per record, space separated,
    /// in global order.
    pub fn write_local(&self, writer: &mut impl Write) -> Result<()> {
        for idx in 0..self.local_records {
            let record = self.local_record(idx);
            let line = record
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(writer, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::SerialComm;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn fixture(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write fixture");
        file
    }

    #[test]
    fn test_load_infers_dimensions_and_counts() {
        let file = fixture("1 2\n3 4\n5 6\n");
        let comm = SerialComm::new();
        let dataset = Dataset::load(file.path(), 0, &comm).unwrap();
        assert_eq!(dataset.dimensions(), 2);
        assert_eq!(dataset.total_records(), 3);
        assert_eq!(dataset.local_records(), 3);
        assert_eq!(dataset.batch_size(), 3);
        assert_eq!(dataset.local_batch_size(), 3);
    }

    #[test]
    fn test_mean_divides_by_record_count() {
        // Sum of all values is 21 over 3 records: the mean spans columns.
        let file = fixture("1 2\n3 4\n5 6\n");
        let comm = SerialComm::new();
        let dataset = Dataset::load(file.path(), 0, &comm).unwrap();
        assert!((dataset.value_mean() - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_trailing_blank_lines_tolerated() {
        let file = fixture("1 2\n3 4\n\n\n");
        let comm = SerialComm::new();
        let dataset = Dataset::load(file.path(), 0, &comm).unwrap();
        assert_eq!(dataset.total_records(), 2);
    }

    #[test]
    fn test_interior_blank_line_rejected() {
        let file = fixture("1 2\n\n3 4\n");
        let comm = SerialComm::new();
        let err = Dataset::load(file.path(), 0, &comm).unwrap_err();
        assert!(matches!(err, LatticaError::Format { line: 2, .. }));
    }

    #[test]
    fn test_empty_first_line_rejected() {
        let file = fixture("\n1 2\n");
        let comm = SerialComm::new();
        let err = Dataset::load(file.path(), 0, &comm).unwrap_err();
        assert!(matches!(err, LatticaError::Format { line: 1, .. }));
    }

    #[test]
    fn test_empty_file_rejected() {
        let file = fixture("");
        let comm = SerialComm::new();
        assert!(Dataset::load(file.path(), 0, &comm).is_err());
    }

    #[test]
    fn test_missing_file_reported_with_path() {
        let comm = SerialComm::new();
        let err = Dataset::load("no/such/dataset.txt", 0, &comm).unwrap_err();
        assert!(matches!(err, LatticaError::DatasetNotFound(_)));
    }

    #[test]
    fn test_bad_field_rejected() {
        let file = fixture("1 2\n3 oops\n");
        let comm = SerialComm::new();
        let err = Dataset::load(file.path(), 0, &comm).unwrap_err();
        assert!(matches!(err, LatticaError::Format { line: 2, .. }));
    }

    #[test]
    fn test_field_count_mismatch_rejected() {
        let file = fixture("1 2\n3\n");
        let comm = SerialComm::new();
        let err = Dataset::load(file.path(), 0, &comm).unwrap_err();
        assert!(matches!(err, LatticaError::Format { line: 2, .. }));
    }

    #[test]
    fn test_local_record_contents() {
        let file = fixture("1 2\n3 4\n5 6\n");
        let comm = SerialComm::new();
        let dataset = Dataset::load(file.path(), 0, &comm).unwrap();
        assert_eq!(dataset.local_record(1), &[3.0, 4.0]);
        assert_eq!(dataset.global_record(2), Some(&[5.0, 6.0][..]));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_local_record_guard() {
        let file = fixture("1 2\n");
        let comm = SerialComm::new();
        let dataset = Dataset::load(file.path(), 0, &comm).unwrap();
        let _ = dataset.local_record(1);
    }

    #[test]
    fn test_write_local_round_trips() {
        let file = fixture("1 2\n3 4\n");
        let comm = SerialComm::new();
        let dataset = Dataset::load(file.path(), 0, &comm).unwrap();
        let mut out = Vec::new();
        dataset.write_local(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1 2\n3 4\n");
    }
}
