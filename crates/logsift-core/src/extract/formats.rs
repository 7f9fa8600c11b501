//! Format-specific block extractors.
//!
//! Each extractor scans the lines of one text independently and returns raw
//! candidate blocks tagged with a generic type. They share no state; the
//! same region of text may be captured by several of them.

use std::sync::LazyLock;

use regex::Regex;

use super::{BlockExtractor, Candidate};

static JVM_HEAD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^.*(Exception|Error|Throwable)(:|\s|$)").unwrap());

static JVM_FRAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*at\s+[\w$.]+\(.*\)$").unwrap());

static DOTNET_FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*at\s+[\w$.`]+\([^)]*\)\s*(in\s+.*?:line\s+\d+)?\s*$").unwrap()
});

static WEB_SERVER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\S+\s+\S+\s+\S+\s+\[(error|crit|alert|emerg)\]\s+\S+:\s+.*$").unwrap()
});

static KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(ERROR|CRITICAL|FATAL|EXCEPTION|Traceback|Unhandled)").unwrap()
});

fn join_block(lines: &[&str]) -> String {
    lines.join("\n").trim().to_string()
}

/// `Traceback (most recent call last):` followed by `File` frames and the
/// final exception line(s).
pub struct PythonTraceback;

impl BlockExtractor for PythonTraceback {
    fn name(&self) -> &'static str {
        "python"
    }

    fn extract(&self, lines: &[&str]) -> Vec<Candidate> {
        let mut out = Vec::new();
        let n = lines.len();
        let mut i = 0;
        while i < n {
            if !lines[i].starts_with("Traceback (most recent call last):") {
                i += 1;
                continue;
            }
            let start = i;
            i += 1;
            while i < n && (lines[i].starts_with("  File") || lines[i].starts_with("    ")) {
                i += 1;
            }
            while i < n
                && (lines[i].contains("Error")
                    || lines[i].contains("Exception")
                    || lines[i].starts_with("During handling"))
            {
                i += 1;
            }
            if i - start > 1 {
                out.push(Candidate::new(join_block(&lines[start..i]), "PythonException"));
            }
        }
        out
    }
}

/// Java, Apex and Node style: an exception head followed by `at pkg.Type.method(...)`
/// frames and `Caused by:` sections. A head with no frames is still kept as a
/// single line when it names an exception or an ERROR/FATAL level.
pub struct JvmStack;

impl BlockExtractor for JvmStack {
    fn name(&self) -> &'static str {
        "jvm"
    }

    fn extract(&self, lines: &[&str]) -> Vec<Candidate> {
        let mut out = Vec::new();
        let n = lines.len();
        let mut i = 0;
        while i < n {
            let head = lines[i];
            if !(JVM_HEAD_RE.is_match(head) || head.trim().starts_with("FATAL_ERROR")) {
                i += 1;
                continue;
            }
            let start = i;
            i += 1;
            let mut frames = 0;
            while i < n {
                let line = lines[i];
                let is_frame = JVM_FRAME_RE.is_match(line);
                if !(is_frame
                    || line.contains("Caused by:")
                    || line.contains("Stack Trace")
                    || line.contains("StackTrace"))
                {
                    break;
                }
                if is_frame {
                    frames += 1;
                }
                i += 1;
            }

            if frames > 0 {
                let tag = if head.contains("FATAL_ERROR") || head.contains("System.") {
                    "ApexException"
                } else {
                    "JavaLikeException"
                };
                out.push(Candidate::new(join_block(&lines[start..i]), tag));
            } else if head.contains("Exception") || head.contains("ERROR") || head.contains("FATAL") {
                out.push(Candidate::new(head.trim().to_string(), "GenericError"));
            }
        }
        out
    }
}

/// C#/.NET: an exception head followed by `at Ns.Type.Method(...) in file:line N`
/// frames. Heads without frames are dropped.
pub struct DotNetStack;

impl BlockExtractor for DotNetStack {
    fn name(&self) -> &'static str {
        "dotnet"
    }

    fn extract(&self, lines: &[&str]) -> Vec<Candidate> {
        let mut out = Vec::new();
        let n = lines.len();
        let mut i = 0;
        while i < n {
            let head = lines[i];
            if !(head.contains("Exception:")
                || head.trim().ends_with("Exception")
                || head.contains("System."))
            {
                i += 1;
                continue;
            }
            let start = i;
            i += 1;
            let mut frames = 0;
            while i < n {
                let is_frame = DOTNET_FRAME_RE.is_match(lines[i]);
                if !(is_frame || lines[i].contains("--- End of stack trace")) {
                    break;
                }
                if is_frame {
                    frames += 1;
                }
                i += 1;
            }
            if frames > 0 {
                out.push(Candidate::new(join_block(&lines[start..i]), "DotNetException"));
            }
        }
        out
    }
}

/// Nginx/Apache error-log lines: `date time pid [error|crit|alert|emerg] id: message`.
pub struct WebServerLine;

impl BlockExtractor for WebServerLine {
    fn name(&self) -> &'static str {
        "web-server"
    }

    fn extract(&self, lines: &[&str]) -> Vec<Candidate> {
        lines
            .iter()
            .filter(|line| WEB_SERVER_RE.is_match(line))
            .map(|line| Candidate::new(line.trim().to_string(), "WebServerError"))
            .collect()
    }
}

/// Fallback: any line with an error keyword plus up to `context_lines`
/// following lines, stopping early at a blank line.
pub struct KeywordContext {
    pub context_lines: usize,
}

impl Default for KeywordContext {
    fn default() -> Self {
        Self { context_lines: 5 }
    }
}

impl BlockExtractor for KeywordContext {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn extract(&self, lines: &[&str]) -> Vec<Candidate> {
        let mut out = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            if !KEYWORD_RE.is_match(line) {
                continue;
            }
            let mut end = i + 1;
            while end < lines.len() && end - i <= self.context_lines && !lines[end].trim().is_empty() {
                end += 1;
            }
            out.push(Candidate::new(join_block(&lines[i..end]), "GenericError"));
        }
        out
    }
}
