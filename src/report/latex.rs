//! LaTeX snippets and the external document build.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{info, warn};

use crate::error::Result;
use crate::simulation::runner::is_available;
use crate::types::ParameterVector;

/// `cases` block listing the searched design values in display units.
pub fn input_values_block(parameters: &ParameterVector) -> Result<String> {
    let sa = parameters.require("Sa")?;
    let r34 = parameters.require("R34")?;
    let rmp = parameters.require("Rmp")?;
    let ibmain = parameters.require("Ibmain")?;
    let cin = parameters.require("Cin")?;
    let sa_b = parameters.require("Sa_b")?;

    Ok(format!(
        r"
\begin{{equation}}
    \begin{{cases}}
        S_a = {} \\
        R_{{34}} = {} \\
        R_{{mp}} = {} \\
        I_{{bmain}} = {} \mu A \\
        C_{{in}} = {} p F \\
        S_{{ab}} = {}
    \end{{cases}}
\end{{equation}}
",
        sa,
        r34,
        rmp,
        display(ibmain * 1e6),
        display(cin * 1e12),
        sa_b
    ))
}

/// Shortest decimal for a scaled value, hiding float noise from the
/// unit conversion.
pub fn display(value: f64) -> String {
    let rounded = (value * 1e9).round() / 1e9;
    rounded.to_string()
}

/// Archive name encoding the design point, e.g.
/// `Sa_0.99_R34_95_Rmp_0.9_Ibmain_572.25_Cin_32.18_Sab_17.pdf`.
pub fn archive_name(parameters: &ParameterVector) -> Result<String> {
    Ok(format!(
        "Sa_{}_R34_{}_Rmp_{}_Ibmain_{}_Cin_{}_Sab_{}.pdf",
        parameters.require("Sa")?,
        parameters.require("R34")?,
        parameters.require("Rmp")?,
        display(parameters.require("Ibmain")? * 1e6),
        display(parameters.require("Cin")? * 1e12),
        parameters.require("Sa_b")?
    ))
}

/// Build tools for the report document.
pub struct LatexBuild<'a> {
    pub latex: &'a str,
    pub ghostscript: &'a str,
}

impl LatexBuild<'_> {
    /// Compile `{dir}/{name}.tex`; returns the PDF path when one was made.
    pub fn compile(&self, dir: &Path, name: &str) -> Result<Option<PathBuf>> {
        if !is_available(self.latex) {
            warn!("{} not found in PATH, can't compile the report", self.latex);
            return Ok(None);
        }

        let pdf = dir.join(format!("{}.pdf", name));
        if pdf.exists() {
            fs::remove_file(&pdf)?;
        }

        info!("Compiling {}.tex", name);
        let status = Command::new(self.latex)
            .args([
                "--max-print-line=10000",
                "-synctex=1",
                "-shell-escape",
                "-interaction=nonstopmode",
                "-file-line-error",
                "-recorder",
            ])
            .arg(format!("{}.tex", name))
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()?;
        if !status.success() {
            warn!("{} exited with {}", self.latex, status);
        }

        if !pdf.exists() {
            warn!("{} produced no {}", self.latex, pdf.display());
            return Ok(None);
        }

        self.compress(dir, name, &pdf)?;
        Ok(Some(pdf))
    }

    /// Ghostscript size pass; keeps whichever file is smaller.
    fn compress(&self, dir: &Path, name: &str, pdf: &Path) -> Result<()> {
        if !is_available(self.ghostscript) {
            warn!("{} not installed, can't compress the report", self.ghostscript);
            return Ok(());
        }

        let temp_name = format!("{}_temp.pdf", name);
        let status = Command::new(self.ghostscript)
            .args([
                "-sDEVICE=pdfwrite",
                "-dCompatibilityLevel=1.7",
                "-dPDFSETTINGS=/prepress",
                "-dNOPAUSE",
                "-dQUIET",
                "-dBATCH",
                "-dColorImageFilter=/FlateEncode",
                "-dGrayImageFilter=/FlateEncode",
                "-dMonoImageFilter=/FlateEncode",
                "-dCompressFonts=true",
                "-dSubsetFonts=true",
                "-dRemoveFileName=true",
            ])
            .arg(format!("-sOutputFile={}", temp_name))
            .arg(format!("{}.pdf", name))
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()?;

        let temp = dir.join(&temp_name);
        if !status.success() || !temp.exists() {
            warn!("{} exited with {}", self.ghostscript, status);
            if temp.exists() {
                fs::remove_file(&temp)?;
            }
            return Ok(());
        }

        let original = fs::metadata(pdf)?.len();
        let compressed = fs::metadata(&temp)?.len();
        if compressed > 0 && compressed < original {
            info!(
                "Reduced pdf size by a factor {:.2}",
                original as f64 / compressed as f64
            );
            fs::rename(&temp, pdf)?;
        } else {
            fs::remove_file(&temp)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn optimum() -> ParameterVector {
        ParameterVector::amplifier(4.8, 6.2, 0.99, 0.9, 95.0, 572.25e-6, 32.18e-12, 17.0).unwrap()
    }

    #[test]
    fn equation_block_uses_display_units() {
        let block = input_values_block(&optimum()).unwrap();
        assert!(block.contains(r"I_{bmain} = 572.25 \mu A"));
        assert!(block.contains("C_{in} = 32.18 p F"));
        assert!(block.contains("R_{34} = 95 \\\\"));
        assert!(block.contains(r"\begin{cases}"));
    }

    #[test]
    fn archive_name_encodes_the_design() {
        assert_eq!(
            archive_name(&optimum()).unwrap(),
            "Sa_0.99_R34_95_Rmp_0.9_Ibmain_572.25_Cin_32.18_Sab_17.pdf"
        );
    }

    #[test]
    fn missing_compiler_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let build = LatexBuild {
            latex: "definitely-not-a-latex-binary",
            ghostscript: "gs",
        };
        assert_eq!(build.compile(dir.path(), "report").unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn failed_compile_does_not_reuse_an_old_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("report.pdf");
        fs::write(&stale, "%PDF from an earlier design").unwrap();
        let build = LatexBuild {
            latex: "false",
            ghostscript: "definitely-not-ghostscript",
        };
        assert_eq!(build.compile(dir.path(), "report").unwrap(), None);
        assert!(!stale.exists());
    }
}
