// SPDX-License-Identifier: MPL-2.0

use std::collections::HashMap;

/// What the compositor told us about an output before naming it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutputDescriptor {
    pub name: Option<String>,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Assign a unique name to every output, in enumeration order.
///
/// Protocol names are used as-is. Outputs without one are named after their
/// geometry, e.g. `OUTPUT-1920x1080` or `OUTPUT-1920x1080-1920+0`. Any
/// repeat gets a `-N` suffix.
pub fn output_names(outputs: &[OutputDescriptor]) -> Vec<String> {
    let mut seen: HashMap<String, u32> = HashMap::new();
    let mut names = Vec::with_capacity(outputs.len());

    for output in outputs {
        let base = match output.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() && name != "Unknown" => name.to_owned(),
            _ => synthesize(output),
        };

        let mut name = base.clone();
        while names.contains(&name) {
            let n = seen.entry(base.clone()).or_insert(0);
            *n += 1;
            name = format!("{base}-{n}");
        }

        names.push(name);
    }

    names
}

fn synthesize(output: &OutputDescriptor) -> String {
    let mut name = format!("OUTPUT-{}x{}", output.width, output.height);
    if output.x != 0 || output.y != 0 {
        name.push_str(&format!("-{}+{}", output.x, output.y));
    }
    name
}
