use std::io::IsTerminal;

use anstyle::{AnsiColor, Effects, Style};
use vmpm_core::PluginDescriptor;
use vmpm_installer::LinkReport;
use vmpm_registry::SourceInfo;

use crate::manager::{short_commit, InstalledRow, Status, StatusLine, VmInfo};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputStyle {
    Plain,
    Rich,
}

/// Rich output only when stdout is a terminal and `NO_COLOR` is unset.
pub fn current_output_style() -> OutputStyle {
    output_style_for(
        std::io::stdout().is_terminal(),
        std::env::var_os("NO_COLOR").is_some(),
    )
}

fn output_style_for(is_terminal: bool, no_color: bool) -> OutputStyle {
    if is_terminal && !no_color {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub fn print_report(style: OutputStyle, report: &[StatusLine]) {
    for line in report {
        println!("{}", render_status_line(style, line.status, &line.message));
    }
}

pub fn render_status_line(style: OutputStyle, status: Status, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let (badge, badge_style) = match status {
                Status::Ok => ("[OK]", Style::new().fg_color(Some(AnsiColor::Green.into()))),
                Status::Skipped => ("[..]", Style::new().effects(Effects::DIMMED)),
                Status::Warning => ("[WARN]", Style::new().fg_color(Some(AnsiColor::Yellow.into()))),
            };
            format!("{} {message}", colorize(badge_style.effects(Effects::BOLD), badge))
        }
    }
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub fn format_repository_lines(rows: &[(String, SourceInfo)]) -> Vec<String> {
    let table = rows
        .iter()
        .map(|(alias, source)| {
            vec![
                alias.clone(),
                source.url.clone(),
                source.branch.clone(),
                short_commit(&source.commit).to_string(),
            ]
        })
        .collect::<Vec<_>>();
    format_table(&["alias", "url", "branch", "commit"], &table)
}

pub fn format_installed_lines(rows: &[InstalledRow]) -> Vec<String> {
    if rows.is_empty() {
        return vec!["no plugins installed".to_string()];
    }
    let table = rows
        .iter()
        .map(|row| {
            vec![
                row.name.clone(),
                row.info.id.clone(),
                short_commit(&row.info.commit).to_string(),
                if row.outdated { "upgradable" } else { "" }.to_string(),
            ]
        })
        .collect::<Vec<_>>();
    format_table(&["name", "id", "commit", ""], &table)
}

pub fn format_info_lines(info: &VmInfo) -> Vec<String> {
    let vm = &info.definition.definition;
    let mut lines = vec![format!("Name: {}", info.name)];
    if !vm.id.is_empty() {
        lines.push(format!("ID: {}", vm.id));
    }
    push_field(&mut lines, "Homepage", vm.homepage());
    push_field(&mut lines, "Description", vm.description());
    if !vm.maintainers().is_empty() {
        lines.push(format!("Maintainers: {}", vm.maintainers().join(", ")));
    }
    push_field(&mut lines, "URL", &vm.url);
    push_field(&mut lines, "SHA-256", &vm.sha256);
    lines.push(format!("Definition commit: {}", info.definition.commit));
    let status = match (&info.installed, info.outdated) {
        (None, _) => "not installed".to_string(),
        (Some(installed), false) => format!("installed ({})", installed.id),
        (Some(installed), true) => format!("installed ({}), upgrade available", installed.id),
    };
    lines.push(format!("Status: {status}"));
    lines
}

pub fn format_link_lines(report: &LinkReport) -> Vec<String> {
    vec![
        "Plugin linked successfully:".to_string(),
        format!("  Package:  {}", report.package),
        format!("  VM Name:  {}", report.vm_name),
        format!("  VMID:     {}", report.plugin_id),
        format!("  Binary:   {}", report.binary.display()),
        format!("  Symlink:  {}", report.symlink.display()),
    ]
}

fn push_field(lines: &mut Vec<String>, label: &str, value: &str) {
    if !value.is_empty() {
        lines.push(format!("{label}: {value}"));
    }
}

/// Left-aligned columns separated by two spaces; trailing blanks trimmed.
fn format_table(header: &[&str], rows: &[Vec<String>]) -> Vec<String> {
    let mut widths = header.iter().map(|title| title.len()).collect::<Vec<_>>();
    for row in rows {
        for (index, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(index) {
                *width = (*width).max(cell.len());
            }
        }
    }

    let render = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}", width = *width))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![render(header.to_vec())];
    for row in rows {
        lines.push(render(row.iter().map(String::as_str).collect()));
    }
    lines
}
