use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding this crate's sources.
const SOURCE_ROOTS: &[&str] = &["zv", "sampler", "cli", "tests", "benches"];

const FORBIDDEN_COMMENT_WORDS: &[&str] = &[
    "FIXED", "FIXES", "FIX", "CORRECTED", "NEW", "CHANGED", "CHANGES", "CHANGE", "MODIFIED",
    "MODIFIES", "MODIFY", "UPDATED", "UPDATES", "UPDATE",
];

/// One source rule. `pattern` preselects candidate lines; `violates` makes the final call
/// on a candidate, so string contents and code can be told apart from comments.
struct Rule {
    description: &'static str,
    pattern: &'static str,
    violates: fn(&str) -> bool,
}

const RULES: &[Rule] = &[
    Rule {
        description: "underscore-prefixed identifier",
        pattern: r"\b_[a-zA-Z0-9_]+",
        violates: has_underscore_identifier,
    },
    Rule {
        description: "#[allow(dead_code)] attribute",
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        violates: outside_comment,
    },
    Rule {
        description: "forbidden word in comment",
        pattern: r"(//|/\*).*(FIX|CORRECTED|NEW|CHANGE|MODIF|UPDATE)",
        violates: has_forbidden_comment_word,
    },
    Rule {
        description: "'**' in non-doc comment",
        pattern: r"(//|/\*).*\*\*",
        violates: has_stars_in_plain_comment,
    },
    Rule {
        description: "comment written entirely in uppercase",
        pattern: r"(//|/\*)",
        violates: has_all_caps_comment,
    },
];

/// Collects the lines of one file that break a rule.
struct LineCollector {
    violates: fn(&str) -> bool,
    hits: Vec<(u64, String)>,
}

impl Sink for LineCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line = String::from_utf8_lossy(mat.bytes());
        let line = line.trim_end();
        if (self.violates)(line) {
            self.hits
                .push((mat.line_number().unwrap_or(0), line.to_string()));
        }
        Ok(true)
    }
}

/// Splits a line into its code with string contents blanked out, and its comment text
/// (everything after `//` or `/*`), if any.
fn split_line(line: &str) -> (String, Option<&str>) {
    let mut code = String::with_capacity(line.len());
    let mut in_string = false;
    let mut chars = line.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if in_string {
            match c {
                '\\' => {
                    chars.next();
                }
                '"' => {
                    in_string = false;
                    code.push('"');
                }
                _ => code.push(' '),
            }
            continue;
        }
        match c {
            '\'' if line[i..].starts_with("'\"'") => {
                chars.next();
                chars.next();
                code.push_str("' '");
            }
            '"' => {
                in_string = true;
                code.push('"');
            }
            '/' if matches!(chars.peek(), Some((_, '/')) | Some((_, '*'))) => {
                return (code, Some(&line[i..]));
            }
            _ => code.push(c),
        }
    }
    (code, None)
}

/// Comment text without its `//`, `///`, `//!` or `/*` marker.
fn comment_body(comment: &str) -> &str {
    let body = match comment.strip_prefix("/*") {
        Some(block) => block,
        None => comment.trim_start_matches('/').trim_start_matches('!'),
    };
    match body.find("*/") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

fn is_doc_comment(comment: &str) -> bool {
    comment.starts_with("///") || comment.starts_with("//!")
}

fn has_underscore_identifier(line: &str) -> bool {
    let (code, _) = split_line(line);
    let bytes = code.as_bytes();
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    (0..bytes.len()).any(|i| {
        bytes[i] == b'_'
            && (i == 0 || !is_word(bytes[i - 1]))
            && bytes.get(i + 1).is_some_and(|&next| is_word(next))
    })
}

fn outside_comment(line: &str) -> bool {
    let (code, _) = split_line(line);
    code.contains("allow")
}

fn has_forbidden_comment_word(line: &str) -> bool {
    split_line(line)
        .1
        .is_some_and(|comment| FORBIDDEN_COMMENT_WORDS.iter().any(|w| comment.contains(w)))
}

fn has_stars_in_plain_comment(line: &str) -> bool {
    split_line(line)
        .1
        .is_some_and(|comment| !is_doc_comment(comment) && comment.contains("**"))
}

fn has_all_caps_comment(line: &str) -> bool {
    split_line(line).1.is_some_and(|comment| {
        let mut letters = comment_body(comment).chars().filter(|c| c.is_alphabetic());
        let first = letters.next();
        first.is_some_and(|c| c.is_uppercase()) && letters.all(|c| c.is_uppercase())
    })
}

fn rust_sources() -> Vec<PathBuf> {
    SOURCE_ROOTS
        .iter()
        .flat_map(|root| WalkDir::new(root).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn check_file(path: &Path, rules: &[&Rule]) -> Result<Vec<String>, Box<dyn Error>> {
    let mut searcher = Searcher::new();
    let mut report = Vec::new();
    for rule in rules {
        let matcher = RegexMatcher::new_line_matcher(rule.pattern)?;
        let mut collector = LineCollector {
            violates: rule.violates,
            hits: Vec::new(),
        };
        searcher.search_path(&matcher, path, &mut collector)?;
        for (line_number, text) in collector.hits {
            report.push(format!(
                "{}:{}: {}\n    {}",
                path.display(),
                line_number,
                rule.description,
                text
            ));
        }
    }
    Ok(report)
}

fn run_checks() -> Result<Vec<String>, Box<dyn Error>> {
    let all_rules: Vec<&Rule> = RULES.iter().collect();
    let mut violations = Vec::new();
    for path in rust_sources() {
        violations.extend(check_file(&path, &all_rules)?);
    }
    // The build script itself only has to avoid underscore-prefixed names.
    violations.extend(check_file(Path::new("build.rs"), &all_rules[..1])?);
    Ok(violations)
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for root in SOURCE_ROOTS {
        println!("cargo:rerun-if-changed={root}");
    }

    match run_checks() {
        Ok(violations) if violations.is_empty() => {}
        Ok(violations) => {
            eprintln!("\n❌ ERROR: {} source policy violations:", violations.len());
            for violation in &violations {
                eprintln!("{violation}");
            }
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
