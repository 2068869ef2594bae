// Copyright 2026 The Loopscope Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::HashMap;
use std::io::{self, Read, Write};

use crate::common::Ident;
use crate::compiler::{Specs, TIME_OFF};
use crate::ltm::{LinkScoreFrame, LoopSpec, PathSpec};

/// Why a run ended before reaching the stop time.  Both cases leave the
/// rows saved so far in place.
#[derive(Clone, Debug, PartialEq)]
pub enum StopReason {
    /// a stock became NaN at `step`; rows are valid through the previous
    /// step
    NumericFailure { step: usize, ident: Ident },
    Cancelled { step: usize },
}

pub struct Results {
    pub offsets: HashMap<Ident, usize>,
    // one large allocation, row-major: step_count rows of step_size
    pub data: Box<[f64]>,
    pub step_size: usize,
    pub step_count: usize,
    pub specs: Specs,
    pub stop: Option<StopReason>,
    /// (dt step, slot) pairs where a non-negative stock was clamped at 0
    pub clamps: Vec<(usize, usize)>,
    /// per saved row, the link scores for the dt interval ending at that
    /// row; row 0 is always empty
    pub link_frames: Option<Vec<LinkScoreFrame>>,
    pub registered_loops: Vec<LoopSpec>,
    pub registered_paths: Vec<PathSpec>,
}

impl Results {
    pub fn iter(&self) -> std::iter::Take<std::slice::Chunks<'_, f64>> {
        self.data.chunks(self.step_size).take(self.step_count)
    }

    pub fn times(&self) -> Vec<f64> {
        self.iter().map(|row| row[TIME_OFF]).collect()
    }

    /// the saved series for one variable, by canonical ident
    pub fn series(&self, ident: &str) -> Option<Vec<f64>> {
        let off = *self.offsets.get(ident)?;
        Some(self.iter().map(|row| row[off]).collect())
    }

    /// variable names ordered by slot
    pub fn var_names(&self) -> Vec<&str> {
        let mut names: Vec<(&usize, &Ident)> =
            self.offsets.iter().map(|(k, v)| (v, k)).collect();
        names.sort_unstable();
        names.into_iter().map(|(_, k)| k.as_str()).collect()
    }

    #[cfg(feature = "file_io")]
    pub fn write_csv<W: Write>(&self, w: W) -> io::Result<()> {
        let mut wtr = csv::Writer::from_writer(w);
        let names = self.var_names();
        wtr.write_record(&names)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        for row in self.iter() {
            let record: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            wtr.write_record(&record)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        }
        wtr.flush()
    }

    /// The binary time-series record: `magic | version u16 | n_vars u32 |
    /// n_steps u32 | (ident_len u16, ident bytes)* | f64 values in
    /// step-major order`.  Everything little-endian; NaN is written as the
    /// canonical quiet NaN.
    pub fn write_binary<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(BINARY_MAGIC)?;
        w.write_all(&BINARY_VERSION.to_le_bytes())?;
        w.write_all(&(self.step_size as u32).to_le_bytes())?;
        w.write_all(&(self.step_count as u32).to_le_bytes())?;
        for name in self.var_names() {
            let bytes = name.as_bytes();
            w.write_all(&(bytes.len() as u16).to_le_bytes())?;
            w.write_all(bytes)?;
        }
        for row in self.iter() {
            for value in row {
                let value = if value.is_nan() { f64::NAN } else { *value };
                w.write_all(&value.to_le_bytes())?;
            }
        }
        Ok(())
    }
}

pub const BINARY_MAGIC: &[u8; 4] = b"SDTS";
pub const BINARY_VERSION: u16 = 1;

/// A binary time-series record read back from disk.
pub struct BinarySeries {
    pub idents: Vec<Ident>,
    pub data: Vec<f64>,
    pub n_vars: usize,
    pub n_steps: usize,
}

pub fn read_binary<R: Read>(r: &mut R) -> io::Result<BinarySeries> {
    let bad = |msg: &str| io::Error::new(io::ErrorKind::InvalidData, msg.to_string());

    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != BINARY_MAGIC {
        return Err(bad("bad magic"));
    }
    let mut buf2 = [0u8; 2];
    r.read_exact(&mut buf2)?;
    if u16::from_le_bytes(buf2) != BINARY_VERSION {
        return Err(bad("unsupported version"));
    }
    let mut buf4 = [0u8; 4];
    r.read_exact(&mut buf4)?;
    let n_vars = u32::from_le_bytes(buf4) as usize;
    r.read_exact(&mut buf4)?;
    let n_steps = u32::from_le_bytes(buf4) as usize;

    let mut idents = Vec::with_capacity(n_vars);
    for _ in 0..n_vars {
        r.read_exact(&mut buf2)?;
        let len = u16::from_le_bytes(buf2) as usize;
        let mut name = vec![0u8; len];
        r.read_exact(&mut name)?;
        idents.push(String::from_utf8(name).map_err(|_| bad("ident not utf-8"))?);
    }

    let mut data = Vec::with_capacity(n_vars * n_steps);
    let mut buf8 = [0u8; 8];
    for _ in 0..n_vars * n_steps {
        r.read_exact(&mut buf8)?;
        data.push(f64::from_le_bytes(buf8));
    }

    Ok(BinarySeries {
        idents,
        data,
        n_vars,
        n_steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Method;

    fn test_results() -> Results {
        let offsets: HashMap<Ident, usize> = [
            ("time".to_string(), 0),
            ("dt".to_string(), 1),
            ("initial_time".to_string(), 2),
            ("final_time".to_string(), 3),
            ("pop".to_string(), 4),
        ]
        .into_iter()
        .collect();
        Results {
            offsets,
            data: vec![
                0.0, 1.0, 0.0, 2.0, 100.0, //
                1.0, 1.0, 0.0, 2.0, 105.0, //
                2.0, 1.0, 0.0, 2.0, f64::NAN,
            ]
            .into_boxed_slice(),
            step_size: 5,
            step_count: 3,
            specs: Specs {
                start: 0.0,
                stop: 2.0,
                dt: 1.0,
                save_step: 1.0,
                method: Method::Euler,
            },
            stop: None,
            clamps: vec![],
            link_frames: None,
            registered_loops: vec![],
            registered_paths: vec![],
        }
    }

    #[test]
    fn test_series() {
        let results = test_results();
        assert_eq!(vec![0.0, 1.0, 2.0], results.times());
        let pop = results.series("pop").unwrap();
        assert_eq!(100.0, pop[0]);
        assert_eq!(105.0, pop[1]);
        assert!(pop[2].is_nan());
        assert!(results.series("missing").is_none());
    }

    #[test]
    fn test_binary_roundtrip() {
        let results = test_results();
        let mut buf: Vec<u8> = Vec::new();
        results.write_binary(&mut buf).unwrap();

        let series = read_binary(&mut buf.as_slice()).unwrap();
        assert_eq!(5, series.n_vars);
        assert_eq!(3, series.n_steps);
        assert_eq!(
            vec!["time", "dt", "initial_time", "final_time", "pop"],
            series.idents
        );
        assert_eq!(105.0, series.data[9]);
        // NaN round-trips as the canonical quiet NaN
        assert!(series.data[14].is_nan());
        assert_eq!(f64::NAN.to_bits(), series.data[14].to_bits());
    }

    #[test]
    fn test_binary_rejects_bad_magic() {
        let mut buf = b"XXXX".to_vec();
        buf.extend_from_slice(&[0u8; 16]);
        assert!(read_binary(&mut buf.as_slice()).is_err());
    }
}
