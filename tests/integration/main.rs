mod build_flow;
mod plan_flow;
mod watch_flow;

use std::path::Path;

/// Write a workspace fixture: a root manifest plus member manifests given
/// as (relative dir, package.json content) pairs.
pub fn write_workspace(root: &Path, patterns: &[&str], members: &[(&str, &str)]) {
    let quoted: Vec<String> = patterns.iter().map(|p| format!("\"{}\"", p)).collect();
    std::fs::write(
        root.join("package.json"),
        format!(
            r#"{{ "name": "root", "workspaces": [{}] }}"#,
            quoted.join(", ")
        ),
    )
    .unwrap();
    for (dir, manifest) in members {
        let member = root.join(dir);
        std::fs::create_dir_all(&member).unwrap();
        std::fs::write(member.join("package.json"), manifest).unwrap();
    }
}
