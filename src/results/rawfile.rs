//! Reader for SPICE raw waveform dumps.
//!
//! A raw file is one or more plots, each a text header followed by data
//! values:
//!
//! - `Title:`, `Plotname:`, `Flags:` (real/complex, double, fastaccess)
//! - `No. Variables:` and `No. Points:`
//! - `Variables:` then one `index name type` line per column
//! - `Values:` (ASCII) or `Binary:` (little endian) before the data
//!
//! ngspice writes UTF-8 headers and 8-byte values throughout. LTspice
//! writes UTF-16LE headers and, for real data, stores the axis as `f64`
//! but every other column as `f32` unless the `double` flag is set.

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use num_complex::Complex64;

use crate::error::{Error, Result};

// ===== TYPES =====

/// Samples of one variable.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceData {
    Real(Vec<f64>),
    Complex(Vec<Complex64>),
}

impl TraceData {
    pub fn len(&self) -> usize {
        match self {
            Self::Real(v) => v.len(),
            Self::Complex(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Real parts.
    pub fn real(&self) -> Vec<f64> {
        match self {
            Self::Real(v) => v.clone(),
            Self::Complex(v) => v.iter().map(|c| c.re).collect(),
        }
    }

    pub fn complex(&self) -> Vec<Complex64> {
        match self {
            Self::Real(v) => v.iter().map(|&r| Complex64::new(r, 0.0)).collect(),
            Self::Complex(v) => v.clone(),
        }
    }

    /// Magnitudes; the sign of real samples is dropped.
    pub fn magnitude(&self) -> Vec<f64> {
        match self {
            Self::Real(v) => v.iter().map(|r| r.abs()).collect(),
            Self::Complex(v) => v.iter().map(|c| c.norm()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub name: String,
    pub kind: String,
    pub data: TraceData,
}

/// One plot: an independent axis and the traces sampled on it.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveforms {
    pub title: String,
    pub plotname: String,
    pub flags: String,
    /// Column 0 is the independent variable.
    pub traces: Vec<Trace>,
}

impl Waveforms {
    pub fn is_complex(&self) -> bool {
        self.flags.to_ascii_lowercase().contains("complex")
    }

    pub fn num_points(&self) -> usize {
        self.traces.first().map(|t| t.data.len()).unwrap_or(0)
    }

    /// Independent axis, sign-folded. LTspice flags compressed time
    /// points and AC sweeps can carry negative samples.
    pub fn axis(&self) -> Vec<f64> {
        self.traces
            .first()
            .map(|t| t.data.magnitude())
            .unwrap_or_default()
    }

    /// Case-insensitive lookup. `I(x)` also matches ngspice's `x#branch`;
    /// `V(x)` also matches `x` and `x_spectrum`.
    pub fn trace(&self, name: &str) -> Option<&Trace> {
        candidate_names(name)
            .iter()
            .find_map(|n| self.traces.iter().find(|t| t.name.eq_ignore_ascii_case(n)))
    }
}

fn candidate_names(name: &str) -> Vec<String> {
    let mut names = vec![name.to_string()];
    let lower = name.to_ascii_lowercase();
    if let Some(inner) = lower.strip_prefix("i(").and_then(|s| s.strip_suffix(')')) {
        names.push(format!("{}#branch", inner));
    } else if let Some(inner) = lower.strip_prefix("v(").and_then(|s| s.strip_suffix(')')) {
        names.push(inner.to_string());
        names.push(format!("{}_spectrum", inner));
    }
    names
}

/// A parsed raw file.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFile {
    pub path: PathBuf,
    pub plots: Vec<Waveforms>,
}

impl RawFile {
    /// First plot containing `name`.
    pub fn plot_with(&self, name: &str) -> Result<&Waveforms> {
        self.plots
            .iter()
            .find(|p| p.trace(name).is_some())
            .ok_or_else(|| self.not_found(name))
    }

    pub fn trace(&self, name: &str) -> Result<&Trace> {
        self.plots
            .iter()
            .find_map(|p| p.trace(name))
            .ok_or_else(|| self.not_found(name))
    }

    /// Axis and samples of `name`, taken from the same plot.
    pub fn series(&self, name: &str) -> Result<(Vec<f64>, &TraceData)> {
        let plot = self.plot_with(name)?;
        let trace = plot.trace(name).ok_or_else(|| self.not_found(name))?;
        Ok((plot.axis(), &trace.data))
    }

    pub fn real(&self, name: &str) -> Result<Vec<f64>> {
        Ok(self.trace(name)?.data.real())
    }

    pub fn complex(&self, name: &str) -> Result<Vec<Complex64>> {
        Ok(self.trace(name)?.data.complex())
    }

    fn not_found(&self, name: &str) -> Error {
        Error::TraceNotFound {
            name: name.to_string(),
            path: self.path.clone(),
        }
    }
}

// ===== PARSING =====

pub fn read(path: impl AsRef<Path>) -> Result<RawFile> {
    let path = path.as_ref();
    let data = fs::read(path)?;
    parse(&data, path)
}

/// Parse raw file bytes; `path` only labels errors.
pub fn parse(data: &[u8], path: &Path) -> Result<RawFile> {
    if data.is_empty() {
        return Err(Error::parse(path, "empty raw file"));
    }

    // ASCII text in UTF-16LE has a zero high byte
    let wide = data.len() >= 2 && data[1] == 0;
    let mut cursor = Cursor { data, pos: 0, wide };
    let mut plots = Vec::new();

    while let Some(header) = read_header(&mut cursor, path)? {
        let columns = if header.binary {
            read_binary(&mut cursor, &header, path)?
        } else {
            read_ascii(&mut cursor, &header, path)?
        };

        let traces = header
            .variables
            .iter()
            .cloned()
            .zip(columns)
            .map(|((name, kind), data)| Trace { name, kind, data })
            .collect();

        plots.push(Waveforms {
            title: header.title,
            plotname: header.plotname,
            flags: header.flags,
            traces,
        });
    }

    if plots.is_empty() {
        return Err(Error::parse(path, "no plots found"));
    }

    Ok(RawFile {
        path: path.to_path_buf(),
        plots,
    })
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    wide: bool,
}

impl<'a> Cursor<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn read_line(&mut self) -> Option<String> {
        if self.at_end() {
            return None;
        }
        let rest = &self.data[self.pos..];

        let line = if self.wide {
            let mut units = Vec::new();
            let mut i = 0;
            let mut found = false;
            while i + 1 < rest.len() {
                let unit = u16::from_le_bytes([rest[i], rest[i + 1]]);
                i += 2;
                if unit == u16::from(b'\n') {
                    found = true;
                    break;
                }
                units.push(unit);
            }
            self.pos = if found { self.pos + i } else { self.data.len() };
            String::from_utf16_lossy(&units)
        } else {
            let (line, advance) = match rest.iter().position(|&b| b == b'\n') {
                Some(end) => (&rest[..end], end + 1),
                None => (rest, rest.len()),
            };
            self.pos += advance;
            String::from_utf8_lossy(line).into_owned()
        };

        Some(line.trim_end_matches('\r').to_string())
    }

    fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }
}

#[derive(Debug, Default)]
struct Header {
    title: String,
    plotname: String,
    flags: String,
    num_variables: usize,
    num_points: usize,
    variables: Vec<(String, String)>,
    binary: bool,
}

impl Header {
    fn has_flag(&self, flag: &str) -> bool {
        self.flags
            .split_whitespace()
            .any(|f| f.eq_ignore_ascii_case(flag))
    }

    fn is_complex(&self) -> bool {
        self.has_flag("complex")
    }
}

fn parse_count(value: &str, field: &str, path: &Path) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::parse(path, format!("invalid {}: '{}'", field, value.trim())))
}

/// Read one plot header; `None` at a clean end of file.
fn read_header(cursor: &mut Cursor<'_>, path: &Path) -> Result<Option<Header>> {
    let mut header = Header::default();
    let mut seen_any = false;
    let mut in_variables = false;

    while let Some(line) = cursor.read_line() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        seen_any = true;

        // Variable lines may contain colons (`V(x1:vbp)`), so test them first
        if in_variables && header.variables.len() < header.num_variables {
            let parts: Vec<&str> = trimmed.split_whitespace().collect();
            if parts.len() >= 2 && parts[0].parse::<usize>().is_ok() {
                let kind = parts.get(2).copied().unwrap_or("").to_string();
                header.variables.push((parts[1].to_string(), kind));
                continue;
            }
        }

        let Some((key, value)) = trimmed.split_once(':') else {
            continue;
        };
        match key.trim() {
            "Title" => header.title = value.trim().to_string(),
            "Plotname" => header.plotname = value.trim().to_string(),
            "Flags" => header.flags = value.trim().to_string(),
            "No. Variables" => header.num_variables = parse_count(value, key, path)?,
            "No. Points" => header.num_points = parse_count(value, key, path)?,
            "Variables" => in_variables = true,
            "Values" | "Binary" => {
                header.binary = key.trim() == "Binary";
                if header.variables.len() != header.num_variables {
                    return Err(Error::parse(
                        path,
                        format!(
                            "header declares {} variables but lists {}",
                            header.num_variables,
                            header.variables.len()
                        ),
                    ));
                }
                if header.num_variables == 0 {
                    return Err(Error::parse(path, "plot has no variables"));
                }
                return Ok(Some(header));
            }
            _ => {}
        }
    }

    if seen_any {
        Err(Error::parse(path, "unexpected end of header"))
    } else {
        Ok(None)
    }
}

fn read_f64(bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    f64::from_le_bytes(buf)
}

fn read_f32(bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    f64::from(f32::from_le_bytes(buf))
}

fn read_binary(cursor: &mut Cursor<'_>, header: &Header, path: &Path) -> Result<Vec<TraceData>> {
    if header.has_flag("fastaccess") {
        return Err(Error::parse(path, "column-major (fastaccess) layout is not supported"));
    }

    let complex = header.is_complex();
    let single = cursor.wide && !complex && !header.has_flag("double");
    let widths: Vec<usize> = (0..header.num_variables)
        .map(|i| match (complex, single && i > 0) {
            (true, _) => 16,
            (false, true) => 4,
            (false, false) => 8,
        })
        .collect();
    let row_bytes: usize = widths.iter().sum();

    let body = cursor.remaining();
    let available = body.len() / row_bytes;
    let rows = if available < header.num_points {
        warn!(
            "{}: header declares {} points, data holds {}",
            path.display(),
            header.num_points,
            available
        );
        available
    } else {
        header.num_points
    };

    let mut re = vec![Vec::with_capacity(rows); header.num_variables];
    let mut im = vec![Vec::with_capacity(if complex { rows } else { 0 }); header.num_variables];

    let mut offset = 0;
    for _ in 0..rows {
        for (var, &width) in widths.iter().enumerate() {
            let value = &body[offset..offset + width];
            match width {
                16 => {
                    re[var].push(read_f64(value));
                    im[var].push(read_f64(&value[8..]));
                }
                8 => re[var].push(read_f64(value)),
                _ => re[var].push(read_f32(value)),
            }
            offset += width;
        }
    }
    cursor.pos += offset;

    Ok(assemble(re, im, complex))
}

fn parse_number(token: &str, path: &Path) -> Result<f64> {
    token
        .trim()
        .parse()
        .map_err(|_| Error::parse(path, format!("invalid value '{}'", token.trim())))
}

fn parse_value(token: &str, complex: bool, path: &Path) -> Result<(f64, f64)> {
    match token.split_once(',') {
        Some((r, i)) => Ok((parse_number(r, path)?, parse_number(i, path)?)),
        None if complex => Err(Error::parse(path, format!("expected complex value, got '{}'", token))),
        None => Ok((parse_number(token, path)?, 0.0)),
    }
}

fn read_ascii(cursor: &mut Cursor<'_>, header: &Header, path: &Path) -> Result<Vec<TraceData>> {
    let complex = header.is_complex();
    let n = header.num_variables;
    let mut re = vec![Vec::with_capacity(header.num_points); n];
    let mut im = vec![Vec::with_capacity(if complex { header.num_points } else { 0 }); n];

    let mut points = 0;
    let mut var = 0;
    while points < header.num_points {
        let Some(line) = cursor.read_line() else {
            break;
        };
        let mut tokens = line.split_whitespace();

        // Each point opens with its index, usually followed by the axis value
        if var == 0 && tokens.next().is_none() {
            continue;
        }

        for token in tokens {
            if var >= n {
                return Err(Error::parse(path, format!("too many values at point {}", points)));
            }
            let (r, i) = parse_value(token, complex, path)?;
            re[var].push(r);
            if complex {
                im[var].push(i);
            }
            var += 1;
        }

        if var == n {
            points += 1;
            var = 0;
        }
    }

    if points < header.num_points {
        return Err(Error::parse(
            path,
            format!("expected {} points, found {}", header.num_points, points),
        ));
    }

    Ok(assemble(re, im, complex))
}

fn assemble(re: Vec<Vec<f64>>, im: Vec<Vec<f64>>, complex: bool) -> Vec<TraceData> {
    if complex {
        re.into_iter()
            .zip(im)
            .map(|(r, i)| {
                TraceData::Complex(r.into_iter().zip(i).map(|(r, i)| Complex64::new(r, i)).collect())
            })
            .collect()
    } else {
        re.into_iter().map(TraceData::Real).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const TRAN_ASCII: &str = "Title: closed loop
Date: Thu Jan  1 00:00:00 2026
Plotname: Transient Analysis
Flags: real
No. Variables: 3
No. Points: 3
Variables:
\t0\ttime\ttime
\t1\tV(x1:vbp)\tvoltage
\t2\tI(Vdd)\tdevice_current
Values:
0\t0.000000000000000e+00
\t1.0
\t-1e-4

1\t1.000000000000000e-06
\t1.1
\t-2e-4

2\t-2.000000000000000e-06
\t1.2
\t-3e-4
";

    fn parse_str(text: &str) -> Result<RawFile> {
        parse(text.as_bytes(), Path::new("test.raw"))
    }

    fn utf16(text: &str) -> Vec<u8> {
        text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[test]
    fn parses_ascii_real() {
        let raw = parse_str(TRAN_ASCII).unwrap();
        assert_eq!(raw.plots.len(), 1);
        let plot = &raw.plots[0];
        assert_eq!(plot.plotname, "Transient Analysis");
        assert_eq!(plot.num_points(), 3);
        assert_eq!(plot.axis(), vec![0.0, 1e-6, 2e-6]);
        assert_eq!(raw.real("v(X1:VBP)").unwrap(), vec![1.0, 1.1, 1.2]);
        assert_eq!(raw.real("I(vdd)").unwrap()[2], -3e-4);
    }

    #[test]
    fn missing_trace_is_named() {
        let raw = parse_str(TRAN_ASCII).unwrap();
        match raw.trace("V(out)") {
            Err(Error::TraceNotFound { name, .. }) => assert_eq!(name, "V(out)"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_ascii_complex_and_multiple_plots() {
        let text = "Title: ac
Plotname: AC Analysis
Flags: complex
No. Variables: 2
No. Points: 2
Variables:
\t0\tfrequency\tfrequency grid=3
\t1\tv(vo)\tvoltage
Values:
 0\t1.0,0.0
\t10.0,0.0
 1\t10.0,0.0
\t0.0,-5.0

Title: noise
Plotname: Noise Spectral Density Curves
Flags: real
No. Variables: 2
No. Points: 1
Variables:
\t0\tfrequency\tfrequency
\t1\tonoise_spectrum\tdensity
Values:
 0\t1e4
\t2e-8
";
        let raw = parse_str(text).unwrap();
        assert_eq!(raw.plots.len(), 2);
        let vo = raw.complex("V(Vo)").unwrap();
        assert_eq!(vo[1], Complex64::new(0.0, -5.0));
        let (f, density) = raw.series("V(onoise)").unwrap();
        assert_eq!(f, vec![1e4]);
        assert_eq!(density.real(), vec![2e-8]);
    }

    #[test]
    fn parses_ngspice_binary() {
        let mut data = b"Title: t\nPlotname: Transient Analysis\nFlags: real\nNo. Variables: 2\nNo. Points: 2\nVariables:\n\t0\ttime\ttime\n\t1\tv(out)\tvoltage\nBinary:\n".to_vec();
        for v in [0.0f64, 0.5, 1e-6, 0.75] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let raw = parse(&data, Path::new("b.raw")).unwrap();
        assert_eq!(raw.real("V(out)").unwrap(), vec![0.5, 0.75]);
        assert_eq!(raw.plots[0].axis(), vec![0.0, 1e-6]);
    }

    #[test]
    fn parses_ltspice_utf16_single_precision() {
        let header = "Title: * closed loop\nDate: now\nPlotname: Transient Analysis\nFlags: real forward\nNo. Variables: 2\nNo. Points:           2\nOffset:   0\nCommand: Linear Technology Corporation LTspice XVII\nVariables:\n\t0\ttime\ttime\n\t1\tV(n001)\tvoltage\nBinary:\n";
        let mut data = utf16(header);
        data.extend_from_slice(&0.0f64.to_le_bytes());
        data.extend_from_slice(&0.25f32.to_le_bytes());
        data.extend_from_slice(&(-1e-6f64).to_le_bytes());
        data.extend_from_slice(&0.5f32.to_le_bytes());

        let raw = parse(&data, Path::new("lt.raw")).unwrap();
        assert_eq!(raw.real("V(n001)").unwrap(), vec![0.25, 0.5]);
        assert_relative_eq!(raw.plots[0].axis()[1], 1e-6);
    }

    #[test]
    fn parses_ltspice_complex_binary() {
        let header = "Title: ac\nPlotname: AC Analysis\nFlags: complex forward log\nNo. Variables: 2\nNo. Points: 1\nVariables:\n\t0\tfrequency\tfrequency\n\t1\tV(vinp)\tvoltage\nBinary:\n";
        let mut data = utf16(header);
        for v in [-100.0f64, 0.0, 3.0, -4.0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let raw = parse(&data, Path::new("lt_ac.raw")).unwrap();
        assert_eq!(raw.plots[0].axis(), vec![100.0]);
        assert_eq!(raw.complex("V(Vinp)").unwrap()[0].norm(), 5.0);
    }

    #[test]
    fn rejects_truncated_ascii_and_empty_input() {
        let truncated = TRAN_ASCII.replace("No. Points: 3", "No. Points: 4");
        assert!(matches!(parse_str(&truncated), Err(Error::Parse { .. })));
        assert!(matches!(parse_str(""), Err(Error::Parse { .. })));
    }
}
