/// Parse a debdiff
///
/// # Arguments
/// * `text` - The debdiff
///
/// # Returns
/// An iterator over the sections of the debdiff
/// Each section is a tuple of the title of the section and the lines of the section
/// The title is None if the section is a paragraph
/// The lines are a Vec of strings
pub fn iter_sections(text: &str) -> impl Iterator<Item = (Option<&str>, Vec<&str>)> {
    let lines = text.split_terminator('\n').collect::<Vec<_>>();
    let mut title = None;
    let mut paragraph = Vec::new();
    let mut i = 0;
    let mut ret = vec![];
    while i < lines.len() {
        let line = lines[i];
        if i + 1 < lines.len() && lines[i + 1] == ("-".repeat(line.len())) {
            if title.is_some() || !paragraph.is_empty() {
                ret.push((title, paragraph));
            }
            title = Some(line);
            paragraph = Vec::new();
            i += 1;
        } else if line.trim_end().is_empty() {
            if title.is_some() || !paragraph.is_empty() {
                ret.push((title, paragraph));
            }
            title = None;
            paragraph = Vec::new();
        } else {
            paragraph.push(line);
        }
        i += 1;
    }
    if title.is_some() || !paragraph.is_empty() {
        ret.push((title, paragraph));
    }
    ret.into_iter()
}

/// Filter boring lines out of a wdiff
///
/// # Arguments
/// * `lines` - The lines of the wdiff
/// * `old_version` - The old version
/// * `new_version` - The new version
///
/// # Returns
/// A new Vec of lines with the boring lines removed
pub fn filter_boring_wdiff<'a>(
    lines: Vec<&'a str>,
    old_version: &'a str,
    new_version: &'a str,
) -> Vec<String> {
    if lines.is_empty() {
        return Vec::new();
    }
    let (field, _changes) = match lines[0].split_once(':') {
        Some((field, changes)) => (field, changes),
        None => {
            return lines
                .iter()
                .map(|line| line.to_string())
                .collect::<Vec<_>>()
        }
    };
    if field == "Installed-Size" {
        return Vec::new();
    }
    if field == "Version" {
        return Vec::new();
    }
    let regex = fancy_regex::Regex::new(&format!(
        r"\[-{}(.*?)-\] \{{\+{}\1\+\}}",
        regex::escape(old_version),
        regex::escape(new_version),
    ))
    .unwrap();

    let lines = lines
        .iter()
        .map(|line| regex.replace_all(line, r"$1").to_string())
        .collect::<Vec<_>>();
    let block = lines.join("\n");

    if lazy_regex::regex_find!(r"\[-.*?-\]", &block).is_none()
        && lazy_regex::regex_find!(r"\{\+.*?\+\}", &block).is_none()
    {
        return Vec::new();
    }
    lines
}

fn iter_fields<'a>(
    lines: impl Iterator<Item = &'a str> + 'a,
) -> impl Iterator<Item = Vec<&'a str>> + 'a {
    let mut cl = Vec::new();
    let mut ret = Vec::new();
    for line in lines {
        if !cl.is_empty() && line.starts_with(" ") {
            cl.push(line);
        } else {
            if !cl.is_empty() {
                ret.push(cl);
            }
            cl = vec![line];
        }
    }
    if !cl.is_empty() {
        ret.push(cl);
    }
    ret.into_iter()
}

/// Filter boring lines out of a debdiff
///
/// # Arguments
/// * `debdiff` - The debdiff
/// * `old_version` - The old version
/// * `new_version` - The new version
///
/// # Returns
/// A new debdiff with the boring lines removed
pub fn filter_boring(debdiff: &str, old_version: &str, new_version: &str) -> String {
    let mut ret = Vec::new();
    for (title, paragraph) in iter_sections(debdiff) {
        let title = if let Some(title) = title {
            title
        } else {
            ret.push((
                title,
                paragraph
                    .iter()
                    .map(|line| line.to_string())
                    .collect::<Vec<_>>(),
            ));
            continue;
        };
        let (package, wdiff) = if let Some((_, package)) = lazy_regex::regex_captures!(
            r"Control files of package (.*): lines which differ \(wdiff format\)",
            title
        ) {
            (Some(package), true)
        } else if title == "Control files: lines which differ (wdiff format)" {
            (None, true)
        } else {
            (None, false)
        };
        if wdiff {
            let mut paragraph_unfiltered = Vec::new();
            for lines in iter_fields(paragraph.into_iter()) {
                let newlines = filter_boring_wdiff(lines, old_version, new_version);
                paragraph_unfiltered.extend(newlines);
            }
            let paragraph = paragraph_unfiltered;
            if paragraph.iter().any(|line| !line.trim().is_empty()) {
                ret.push((Some(title), paragraph));
            } else if let Some(package) = package {
                ret.push((
                    None,
                    vec![format!(
                        "No differences were encountered between the control files of package {}",
                        package
                    )],
                ));
            } else {
                ret.push((
                    None,
                    vec!["No differences were encountered in the control files".to_string()],
                ));
            }
        } else {
            ret.push((
                Some(title),
                paragraph
                    .iter()
                    .map(|line| line.to_string())
                    .collect::<Vec<_>>(),
            ));
        }
    }

    let mut lines = vec![];
    for (title, paragraph) in ret {
        if let Some(title) = title {
            lines.push(title.to_string());
            lines.push("-".repeat(title.len()));
        }
        lines.extend(paragraph);
        lines.push("".to_string());
    }
    lines.join("\n")
}

#[derive(Debug)]
pub struct DebdiffError {
    message: String,
}

impl From<tokio::io::Error> for DebdiffError {
    fn from(e: tokio::io::Error) -> Self {
        DebdiffError {
            message: e.to_string(),
        }
    }
}

impl std::fmt::Display for DebdiffError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "DebdiffError: {}", self.message)
    }
}

impl std::error::Error for DebdiffError {}

pub async fn run_debdiff(
    old_binaries: Vec<&str>,
    new_binaries: Vec<&str>,
) -> Result<Vec<u8>, DebdiffError> {
    // Validate all file paths to prevent command injection
    for path in old_binaries.iter().chain(new_binaries.iter()) {
        // Check for shell metacharacters and path traversal
        if path.contains("..") || 
           path.chars().any(|c| matches!(c, ';' | '&' | '|' | '$' | '`' | '\n' | '\r' | '\0')) {
            return Err(DebdiffError {
                message: format!("Invalid file path: {}", path),
            });
        }
        
        // Verify the path exists and is a regular file
        let path_obj = std::path::Path::new(path);
        if !path_obj.exists() {
            return Err(DebdiffError {
                message: format!("File not found: {}", path),
            });
        }
        if !path_obj.is_file() {
            return Err(DebdiffError {
                message: format!("Not a regular file: {}", path),
            });
        }
    }
    
    let mut cmd = tokio::process::Command::new("debdiff");
    cmd.arg("--from");
    for path in old_binaries {
        cmd.arg(path);
    }
    cmd.arg("--to");
    for path in new_binaries {
        cmd.arg(path);
    }
    
    let output = cmd.output().await?;
    if !output.status.success() {
        return Err(DebdiffError {
            message: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    Ok(output.stdout)
}

pub fn debdiff_is_empty(debdiff: &str) -> bool {
    !iter_sections(debdiff).any(|(title, _paragraph)| title.is_some())
}

pub fn section_is_wdiff(title: &str) -> (bool, Option<&str>) {
    if let Some((_, package)) = lazy_regex::regex_captures!(
        r"Control files of package (.*): lines which differ \(wdiff format\)",
        title
    ) {
        return (true, Some(package));
    }
    if title == "Control files: lines which differ (wdiff format)" {
        return (true, None);
    }
    (false, None)
}

pub fn markdownify_debdiff(debdiff: &str) -> String {
    let fix_wdiff_md = |line: &str| {
        // GitLab markdown will render links but then not show the
        // delta highlighting. This fools it into not autolinking:
        line.replace("://", "&#8203;://")
    };

    let mut ret = vec![];
    for (title, lines) in iter_sections(debdiff) {
        if let Some(title) = title {
            ret.push(format!("### {}", title));
            let (wdiff, _package) = section_is_wdiff(title);
            if wdiff {
                ret.extend(lines.iter().filter_map(|line| {
                    if line.trim().is_empty() {
                        None
                    } else {
                        Some(format!("* {}", fix_wdiff_md(line)))
                    }
                }));
            } else {
                for line in lines {
                    ret.push(format!("    {}", line));
                }
            }
        } else {
            ret.push("".to_owned());
            for line in lines {
                if !line.trim().is_empty() {
                    let line = lazy_regex::regex_replace!(
                        "^(No differences were encountered between the control files of package) (.*)$",
                        r"$1 \*\*$2\*\*",
                        line,
                    );
                    ret.push(line.to_string());
                } else {
                    ret.push("".to_owned());
                }
            }
            if ret.last() == Some(&String::new()) {
                ret.pop();
            }
        }
    }
    ret.join("\n")
}

pub fn htmlize_debdiff(debdiff: &str) -> String {
    let highlight_wdiff = |line| {
        let line = lazy_regex::regex_replace!(
            r"\[-(.*?)-\]",
            r#"<span style="color:red;font-weight:bold">$1</span>"#,
            line
        );
        let line = lazy_regex::regex_replace!(
            r"\{\+(.*?)\+\}",
            r#"<span style="color:green;font-weight:bold">$1</span>"#,
            line,
        );
        line
    };

    let mut ret = vec![];
    for (title, lines) in iter_sections(debdiff) {
        if let Some(title) = title {
            ret.push(format!("<h4>{}</h4>", title));
            let wdiff = if lazy_regex::regex_is_match!(
                r"Control files of package .*: lines which differ \(wdiff format\)",
                title,
            ) {
                true
            } else {
                title == "Control files: lines which differ (wdiff format)"
            };
            if wdiff {
                ret.push("<ul>".to_owned());
                for mlines in iter_fields(lines.into_iter()) {
                    if mlines.is_empty() {
                        continue;
                    }
                    ret.push(format!(
                        "<li><pre>{}</pre></li>",
                        highlight_wdiff(mlines.join("\n"))
                    ));
                }
                ret.push("</ul>".to_owned());
            } else {
                ret.push("<pre>".to_owned());
                ret.extend(
                    lines
                        .iter()
                        .map(|line| line.to_string())
                        .collect::<Vec<_>>(),
                );
                ret.push("</pre>".to_owned());
            }
        } else {
            ret.push("<p>".to_owned());
            for line in lines {
                if !line.trim().is_empty() {
                    let line = lazy_regex::regex_replace!(
                        "^(No differences were encountered between the control files of package) (.*)$",
                        r"$1 <b>$2</b>",
                        line,
                    ).to_string();
                    ret.push(line);
                } else {
                    ret.push("</p>".to_owned());
                    ret.push("<p>".to_owned());
                }
            }
            if ret.last().unwrap() == "<p>" {
                ret.pop();
            }
        }
    }
    ret.join("\n")
}
