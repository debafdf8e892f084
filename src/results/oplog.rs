//! Simulator log parsing: device operating points and `.meas` results.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;

use crate::error::{Error, Result};

pub const START_MARKER: &str = "Semiconductor Device Operating Points:";
pub const END_MARKER: &str = "Date: ";

/// Read a log that may be UTF-8 or UTF-16LE (LTspice XVII).
pub fn read_log(path: impl AsRef<Path>) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(decode_text(&bytes))
}

pub fn decode_text(bytes: &[u8]) -> String {
    let body = bytes.strip_prefix(&[0xFF, 0xFE]).unwrap_or(bytes);
    let wide = bytes.len() != body.len() || (body.len() >= 2 && body[1] == 0);
    if wide {
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(body).into_owned()
    }
}

// ===== OPERATING POINTS =====

/// Per-device operating-point values keyed by instance name, then by row
/// label (`Vth:`, `Vgs:`, `Vds:`, `Id:`, ...). Values are kept as text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperatingPointTable {
    devices: IndexMap<String, IndexMap<String, String>>,
}

pub fn parse_operating_points(text: &str) -> Result<OperatingPointTable> {
    let (_, section) = text.split_once(START_MARKER).ok_or_else(|| {
        Error::parse(
            "operating point log",
            "could not find the start of the operating points data",
        )
    })?;
    let section = section.split(END_MARKER).next().unwrap_or("");

    let cleaned: Vec<String> = section
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("---"))
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect();
    let cleaned = cleaned.join("\n");

    let mut table = OperatingPointTable::default();
    for block in cleaned.split("Name:").skip(1) {
        let mut lines = block.lines();
        let names: Vec<String> = lines
            .next()
            .unwrap_or("")
            .split_whitespace()
            .map(str::to_string)
            .collect();

        for name in &names {
            table.devices.entry(name.clone()).or_default();
        }

        for line in lines {
            let mut tokens = line.split_whitespace();
            let Some(label) = tokens.next() else {
                continue;
            };
            for (name, value) in names.iter().zip(tokens) {
                if let Some(rows) = table.devices.get_mut(name) {
                    rows.insert(label.to_string(), value.to_string());
                }
            }
        }
    }

    Ok(table)
}

/// Bias check for one device: `|Vth| < |Vgs| < |Vds| + |Vth|`.
#[derive(Debug, Clone, PartialEq)]
pub struct SaturationCheck {
    pub device: String,
    pub vth: f64,
    pub vgs: f64,
    pub vds_plus_vth: f64,
    pub overdrive: f64,
    pub saturated: bool,
}

/// One cell of the exported table.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl Cell {
    fn from_raw(raw: &str) -> Self {
        raw.parse::<f64>()
            .map(Cell::Number)
            .unwrap_or_else(|_| Cell::Text(raw.to_string()))
    }

    fn render(&self) -> String {
        match self {
            Cell::Number(v) => format!("{:.2}", v),
            Cell::Flag(true) => "True".to_string(),
            Cell::Flag(false) => "False".to_string(),
            Cell::Text(s) => s.clone(),
        }
    }

    fn raw(&self) -> String {
        match self {
            Cell::Number(v) => v.to_string(),
            _ => self.render(),
        }
    }
}

/// Saturation rows followed by the raw device rows; devices sorted by name
/// and drain currents in uA.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatingPointSummary {
    pub devices: Vec<String>,
    pub rows: Vec<(String, Vec<Cell>)>,
}

impl OperatingPointTable {
    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn raw(&self, device: &str, row: &str) -> Option<&str> {
        self.devices
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(device))
            .and_then(|(_, rows)| rows.get(row))
            .map(String::as_str)
    }

    pub fn value(&self, device: &str, row: &str) -> Option<f64> {
        self.raw(device, row).and_then(|v| v.parse().ok())
    }

    pub fn require(&self, device: &str, row: &str) -> Result<f64> {
        self.value(device, row)
            .ok_or_else(|| Error::MissingMetric(format!("{} {}", device, row)))
    }

    fn row_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for rows in self.devices.values() {
            for label in rows.keys() {
                if !labels.contains(label) {
                    labels.push(label.clone());
                }
            }
        }
        labels
    }

    fn sorted_devices(&self) -> Vec<String> {
        let mut names: Vec<String> = self.devices.keys().cloned().collect();
        names.sort();
        names
    }

    /// Saturation checks for devices reporting `Vth:`, `Vgs:` and `Vds:`.
    pub fn saturation(&self) -> Vec<SaturationCheck> {
        self.sorted_devices()
            .into_iter()
            .filter_map(|device| {
                let vth = self.value(&device, "Vth:")?.abs();
                let vgs = self.value(&device, "Vgs:")?.abs();
                let vds = self.value(&device, "Vds:")?.abs();
                Some(SaturationCheck {
                    vds_plus_vth: vds + vth,
                    overdrive: vgs - vth,
                    saturated: vth < vgs && vgs < vds + vth,
                    device,
                    vth,
                    vgs,
                })
            })
            .collect()
    }

    pub fn summary(&self) -> OperatingPointSummary {
        let devices = self.sorted_devices();
        let checks = self.saturation();
        let check_for = |d: &str| checks.iter().find(|c| c.device == d);

        type Extract = fn(&SaturationCheck) -> Cell;
        let derived: [(&str, Extract); 5] = [
            (r"$\vert V_{Th} \vert$", |c| Cell::Number(c.vth)),
            (r"$\vert V_{GS} \vert$", |c| Cell::Number(c.vgs)),
            (r"$\vert V_{DS}+V_{Th} \vert$", |c| Cell::Number(c.vds_plus_vth)),
            (r"$\vert V_{GT}-V_{Th} \vert$", |c| Cell::Number(c.overdrive)),
            ("Saturation?", |c| Cell::Flag(c.saturated)),
        ];

        let mut rows = Vec::new();
        for (label, extract) in derived {
            let cells = devices
                .iter()
                .map(|d| check_for(d).map(extract).unwrap_or(Cell::Text(String::new())))
                .collect();
            rows.push((label.to_string(), cells));
        }

        for label in self.row_labels() {
            let cells = devices
                .iter()
                .map(|d| match self.raw(d, &label) {
                    Some(raw) => match (label.as_str(), Cell::from_raw(raw)) {
                        ("Id:", Cell::Number(id)) => Cell::Number(id * 1e6),
                        (_, cell) => cell,
                    },
                    None => Cell::Text(String::new()),
                })
                .collect();
            rows.push((label, cells));
        }

        OperatingPointSummary { devices, rows }
    }
}

impl OperatingPointSummary {
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        out.push(',');
        out.push_str(&self.devices.join(","));
        out.push('\n');
        for (label, cells) in &self.rows {
            out.push_str(&csv_field(label));
            for cell in cells {
                out.push(',');
                out.push_str(&csv_field(&cell.raw()));
            }
            out.push('\n');
        }
        out
    }

    /// Booktabs tabular over the device columns in `range`, values `%.2f`.
    pub fn to_latex(&self, range: std::ops::Range<usize>) -> String {
        let end = range.end.min(self.devices.len());
        let start = range.start.min(end);
        let columns = &self.devices[start..end];

        let mut out = format!("\\begin{{tabular}}{{l{}}}\n\\toprule\n", "l".repeat(columns.len()));
        out.push_str(&format!(" & {} \\\\\n\\midrule\n", columns.join(" & ")));
        for (label, cells) in &self.rows {
            let values: Vec<String> = cells[start..end].iter().map(Cell::render).collect();
            out.push_str(&format!("{} & {} \\\\\n", label, values.join(" & ")));
        }
        out.push_str("\\bottomrule\n\\end{tabular}\n");
        out
    }
}

fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\n']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

// ===== MEASUREMENTS =====

static MEASURE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(\w+)\s*(?::[^=\n]*)?=\s*([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)")
        .expect("measurement pattern is valid")
});

/// `.meas` results read from a log; names are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurements {
    values: IndexMap<String, f64>,
}

impl Measurements {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn require(&self, name: &str) -> Result<f64> {
        self.get(name)
            .ok_or_else(|| Error::MissingMetric(format!("measurement '{}'", name)))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Accepts LTspice (`a0: MAX(v(x))=1.2 FROM ...`, `a1=57.3`) and ngspice
/// (`a1 = 5.73e+01`) forms; later lines win.
pub fn parse_measurements(text: &str) -> Measurements {
    let mut values = IndexMap::new();
    for caps in MEASURE_LINE.captures_iter(text) {
        if let Ok(v) = caps[2].parse::<f64>() {
            values.insert(caps[1].to_ascii_lowercase(), v);
        }
    }
    Measurements { values }
}
