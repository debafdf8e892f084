use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::Result;
use crate::types::ParameterVector;

/// Analysis statements replaced when a mode supplies its own.
const ANALYSIS_DIRECTIVES: [&str; 5] = [".op", ".tran", ".ac", ".noise", ".dc"];

static PARAM_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\w+)\s*=\s*(\{[^}]*\}|\S+)").expect("assignment pattern is valid")
});

fn first_token(line: &str) -> String {
    line.split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Inject a `.param` block for `parameters` after the title line and drop
/// existing assignments to the same names.
pub fn parameterize_netlist(netlist_lines: &[String], parameters: &ParameterVector) -> Vec<String> {
    let mut result = Vec::with_capacity(netlist_lines.len() + 4);
    let names = parameters.names();

    // SPICE treats the first line as the title, whatever it contains
    let has_title = netlist_lines
        .first()
        .map(|l| !l.trim_start().starts_with('.'))
        .unwrap_or(false);
    if has_title {
        result.push(netlist_lines[0].clone());
    }

    result.push("* Design parameters".to_string());
    result.push(format!(".param {}", parameters.to_spice_assignments().join(" ")));

    let start_idx = usize::from(has_title);
    for line in &netlist_lines[start_idx..] {
        if first_token(line) != ".param" {
            result.push(line.clone());
            continue;
        }

        let kept: Vec<String> = PARAM_ASSIGNMENT
            .captures_iter(line)
            .filter(|c| !names.iter().any(|n| n.eq_ignore_ascii_case(&c[1])))
            .map(|c| format!("{}={}", &c[1], &c[2]))
            .collect();

        if !kept.is_empty() {
            result.push(format!(".param {}", kept.join(" ")));
        }
    }

    result
}

/// Replace analysis statements with `directives`, keeping `.end` last.
/// An empty directive list leaves the netlist's own analyses in place.
pub fn add_analysis_directives(netlist: &mut Vec<String>, directives: &[String]) {
    netlist.retain(|line| first_token(line) != ".end");

    if !directives.is_empty() {
        netlist.retain(|line| !ANALYSIS_DIRECTIVES.contains(&first_token(line).as_str()));
        netlist.push("* Simulation settings".to_string());
        netlist.extend(directives.iter().cloned());
    }

    netlist.push(".end".to_string());
}

/// Read a template circuit and produce the netlist for one run.
pub fn materialize(
    template: &Path,
    parameters: &ParameterVector,
    directives: &[String],
) -> Result<Vec<String>> {
    let text = fs::read_to_string(template)?;
    let lines: Vec<String> = text.lines().map(str::to_string).collect();

    let mut netlist = parameterize_netlist(&lines, parameters);
    add_analysis_directives(&mut netlist, directives);
    Ok(netlist)
}

pub fn write_netlist(path: &Path, netlist: &[String]) -> Result<()> {
    let mut file = fs::File::create(path)?;
    for line in netlist {
        writeln!(file, "{}", line)?;
    }
    Ok(())
}
