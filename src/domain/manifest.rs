//! requirements.txt 解析
//!
//! 只做到足以在建立 virtualenv 之前擋下明顯寫壞的檔案，以及安裝後檢查
//! `==` 鎖定的版本。真正的依賴解析交給 pip。

use crate::domain::model::InstalledPackage;
use crate::utils::error::{BootstrapError, Result};
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<name>[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[(?P<extras>[^\]]*)\])?\s*(?P<rest>.*)$",
    )
    .expect("requirement regex")
});

static SPEC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<op>===|==|!=|<=|>=|~=|<|>)\s*(?P<version>[A-Za-z0-9_.*+!-]+)$")
        .expect("specifier regex")
});

static EXTRA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("extra regex"));

static SEPARATORS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_.]+").expect("separator regex"));

/// PEP 503 名稱正規化
pub fn normalize_name(name: &str) -> String {
    SEPARATORS_RE.replace_all(name, "-").to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecifierOp {
    Arbitrary,
    Equal,
    NotEqual,
    LessEqual,
    GreaterEqual,
    Compatible,
    Less,
    Greater,
}

impl SpecifierOp {
    fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "===" => SpecifierOp::Arbitrary,
            "==" => SpecifierOp::Equal,
            "!=" => SpecifierOp::NotEqual,
            "<=" => SpecifierOp::LessEqual,
            ">=" => SpecifierOp::GreaterEqual,
            "~=" => SpecifierOp::Compatible,
            "<" => SpecifierOp::Less,
            ">" => SpecifierOp::Greater,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpecifierOp::Arbitrary => "===",
            SpecifierOp::Equal => "==",
            SpecifierOp::NotEqual => "!=",
            SpecifierOp::LessEqual => "<=",
            SpecifierOp::GreaterEqual => ">=",
            SpecifierOp::Compatible => "~=",
            SpecifierOp::Less => "<",
            SpecifierOp::Greater => ">",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSpecifier {
    pub op: SpecifierOp,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub extras: Vec<String>,
    pub specifiers: Vec<VersionSpecifier>,
    pub marker: Option<String>,
    /// 每行選項，如 `--hash=sha256:...`
    pub options: Vec<String>,
}

impl Requirement {
    /// 單一個 `==X`（不含萬用字元）時回傳 X
    pub fn pinned_version(&self) -> Option<&str> {
        match self.specifiers.as_slice() {
            [spec]
                if matches!(spec.op, SpecifierOp::Equal | SpecifierOp::Arbitrary)
                    && !spec.version.contains('*') =>
            {
                Some(spec.version.as_str())
            }
            _ => None,
        }
    }

    fn parse(text: &str) -> std::result::Result<Self, String> {
        let (text, options) = split_options(text);
        let caps = NAME_RE
            .captures(text)
            .ok_or_else(|| format!("'{}' is not a valid requirement", text))?;

        let name = caps["name"].to_string();

        let extras = match caps.name("extras") {
            Some(raw) => raw
                .as_str()
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(|e| {
                    if EXTRA_RE.is_match(e) {
                        Ok(e.to_string())
                    } else {
                        Err(format!("invalid extra '{}'", e))
                    }
                })
                .collect::<std::result::Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or("");
        let (specs, marker) = match rest.split_once(';') {
            Some((specs, marker)) => {
                let marker = marker.trim();
                if marker.is_empty() {
                    return Err("empty environment marker".to_string());
                }
                (specs.trim(), Some(marker.to_string()))
            }
            None => (rest.trim(), None),
        };

        // 舊式寫法 `name (>=1.0)`
        let specs = specs
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(specs)
            .trim();

        let mut specifiers = Vec::new();
        if !specs.is_empty() {
            for raw in specs.split(',') {
                let raw = raw.trim();
                let spec = SPEC_RE
                    .captures(raw)
                    .ok_or_else(|| format!("invalid version specifier '{}'", raw))?;
                let op = SpecifierOp::parse(&spec["op"])
                    .ok_or_else(|| format!("unknown operator in '{}'", raw))?;
                specifiers.push(VersionSpecifier {
                    op,
                    version: spec["version"].to_string(),
                });
            }
        }

        Ok(Self {
            name,
            extras,
            specifiers,
            marker,
            options,
        })
    }
}

/// 切出第一個前面有空白的 `--option` 之後的部分；`--hash sha256:x` 這種
/// 分開寫的值併回前一個選項
fn split_options(text: &str) -> (&str, Vec<String>) {
    let start = text
        .char_indices()
        .find(|&(i, _)| {
            text[i..].starts_with("--") && text[..i].ends_with(char::is_whitespace)
        })
        .map(|(i, _)| i);

    let Some(start) = start else {
        return (text, Vec::new());
    };

    let mut options: Vec<String> = Vec::new();
    for token in text[start..].split_whitespace() {
        if token.starts_with("--") {
            options.push(token.to_string());
        } else if let Some(last) = options.last_mut() {
            last.push(' ');
            last.push_str(token);
        }
    }
    (text[..start].trim_end(), options)
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        let specs: Vec<String> = self
            .specifiers
            .iter()
            .map(|s| format!("{}{}", s.op.as_str(), s.version))
            .collect();
        write!(f, "{}", specs.join(","))?;
        if let Some(marker) = &self.marker {
            write!(f, "; {}", marker)?;
        }
        for option in &self.options {
            write!(f, " {}", option)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEntry {
    Requirement(Requirement),
    /// pip 選項、URL 或本地路徑，原樣交給 pip
    Directive(String),
}

#[derive(Debug, Clone)]
pub struct DependencyManifest {
    pub path: PathBuf,
    pub entries: Vec<ManifestEntry>,
}

impl DependencyManifest {
    /// 讀取並解析，會跟著 `-r` 讀進被引用的檔案
    pub fn load(path: &Path) -> Result<Self> {
        let mut visited = HashSet::new();
        Self::load_inner(path, &mut visited)
    }

    fn load_inner(path: &Path, visited: &mut HashSet<PathBuf>) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BootstrapError::MissingFile {
                    what: "Dependency manifest".to_string(),
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(BootstrapError::IoError(e)),
        };

        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if !visited.insert(key) {
            tracing::debug!("Skipping already included manifest {}", path.display());
            return Ok(Self {
                path: path.to_path_buf(),
                entries: Vec::new(),
            });
        }

        let manifest = Self::parse(path, &content)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut entries = Vec::with_capacity(manifest.entries.len());
        for entry in manifest.entries {
            let include = match &entry {
                ManifestEntry::Directive(d) => include_target(d).map(str::to_owned),
                _ => None,
            };
            entries.push(entry);
            if let Some(target) = include {
                let nested = Self::load_inner(&base.join(target), visited)?;
                entries.extend(nested.entries);
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// 只解析單一檔案內容
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let mut entries = Vec::new();

        for (line_no, logical) in logical_lines(content) {
            let line = strip_comment(&logical).trim();
            if line.is_empty() {
                continue;
            }

            if is_directive(line) {
                entries.push(ManifestEntry::Directive(line.to_string()));
                continue;
            }

            let requirement =
                Requirement::parse(line).map_err(|reason| BootstrapError::MalformedManifest {
                    path: path.to_path_buf(),
                    line: line_no,
                    reason,
                })?;
            entries.push(ManifestEntry::Requirement(requirement));
        }

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn requirements(&self) -> impl Iterator<Item = &Requirement> {
        self.entries.iter().filter_map(|e| match e {
            ManifestEntry::Requirement(r) => Some(r),
            ManifestEntry::Directive(_) => None,
        })
    }

    pub fn pinned(&self) -> Vec<(&str, &str)> {
        self.requirements()
            .filter(|r| r.marker.is_none())
            .filter_map(|r| r.pinned_version().map(|v| (r.name.as_str(), v)))
            .collect()
    }
}

/// 反斜線續行合併；回傳 (起始行號, 內容)
fn logical_lines(content: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let (start, mut buf) = pending.take().unwrap_or((line_no, String::new()));

        match raw.strip_suffix('\\') {
            Some(head) => {
                buf.push_str(head);
                buf.push(' ');
                pending = Some((start, buf));
            }
            None => {
                buf.push_str(raw);
                lines.push((start, buf));
            }
        }
    }

    if let Some(rest) = pending {
        lines.push(rest);
    }
    lines
}

fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    let bytes = line.as_bytes();
    for (i, ch) in line.char_indices() {
        if ch == '#' && i > 0 && bytes[i - 1].is_ascii_whitespace() {
            return &line[..i];
        }
    }
    line
}

fn is_directive(line: &str) -> bool {
    line.starts_with('-')
        || line.starts_with('.')
        || line.starts_with('/')
        || line.contains("://")
        || line.ends_with(".whl")
        || line.ends_with(".tar.gz")
        || line.ends_with(".zip")
}

fn include_target(directive: &str) -> Option<&str> {
    let target = if let Some(rest) = directive.strip_prefix("--requirement") {
        rest.trim_start_matches('=')
    } else {
        directive.strip_prefix("-r")?
    };
    let target = target.trim();
    (!target.is_empty()).then_some(target)
}

/// 解析 `pip freeze` 輸出；editable 與 direct reference 沒有版本，略過
pub fn parse_freeze_output(lines: &[String]) -> Vec<InstalledPackage> {
    lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('-'))
        .filter_map(|l| l.split_once("=="))
        .map(|(name, version)| InstalledPackage {
            name: name.trim().to_string(),
            version: version.trim().to_string(),
        })
        .collect()
}

/// PEP 440 `==` 比對：release 段尾端補零視為相同（2.31 == 2.31.0），
/// 鎖定版本沒有 local 標籤時忽略已安裝版本的 `+local`
pub fn versions_equal(installed: &str, wanted: &str) -> bool {
    fn canonical(v: &str) -> String {
        let v = v.trim().to_lowercase();
        let v = v.strip_prefix('v').unwrap_or(&v).to_string();
        let mut parts: Vec<&str> = v.split('.').collect();
        while parts.len() > 1 && parts.last() == Some(&"0") {
            parts.pop();
        }
        parts.join(".")
    }
    let installed = if wanted.contains('+') {
        installed
    } else {
        installed.split_once('+').map_or(installed, |(public, _)| public)
    };
    canonical(installed) == canonical(wanted)
}

/// 比對鎖定版本；回傳 (已驗證, 不符)
pub fn verify_pins(
    manifest: &DependencyManifest,
    installed: &[InstalledPackage],
) -> (Vec<String>, Vec<String>) {
    let mut verified = Vec::new();
    let mut mismatches = Vec::new();

    for (name, wanted) in manifest.pinned() {
        let key = normalize_name(name);
        let found = installed.iter().find(|p| normalize_name(&p.name) == key);
        match found {
            Some(pkg) if versions_equal(&pkg.version, wanted) => {
                verified.push(format!("{}=={}", name, wanted));
            }
            Some(pkg) => {
                mismatches.push(format!("{} (wanted {}, found {})", name, wanted, pkg.version));
            }
            None => mismatches.push(format!("{} (wanted {}, not installed)", name, wanted)),
        }
    }

    (verified, mismatches)
}
