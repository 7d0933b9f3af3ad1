//! 규칙 텍스트 파서
//!
//! # 형식
//! ```text
//! [action] <proto> <src> <sport> <-> | <>> <dst> <dport> (msg:"..."; sid:N; severity:high;)
//! [action] <proto> (msg:"..."; sid:N;)
//! ```
//!
//! - `proto`가 `ip` 또는 `any`이면 모든 프로토콜에 매칭됩니다.
//! - 주소: `any`, IP, CIDR, 앞에 `!`를 붙이면 부정
//! - 포트: `any`, `N`, `N:M`, 앞에 `!`를 붙이면 부정
//! - `$HOME_NET` 같은 변수는 `any`로 취급합니다.
//! - 줄 끝의 `\`는 다음 줄로 이어집니다. 빈 줄과 `#` 주석은 무시합니다.
//! - `sid`가 없거나 비어 있는 규칙, 중복 `sid`, 형식이 틀린 줄은 경고 후 건너뜁니다.

use regex::Regex;
use tracing::warn;

use netsentry_core::types::{Protocol, Severity};

use super::rule::{AddressSelector, PortSelector, RuleHeader, SignatureRule};
use crate::error::DetectionError;

/// 옵션 `key:value;` 또는 `key;`
const OPTION_PATTERN: &str = r#"([A-Za-z_][A-Za-z0-9_.]*)\s*(?::\s*("(?:[^"\\]|\\.)*"|[^;]*))?\s*;"#;

/// 파싱 결과
#[derive(Debug, Default)]
pub struct ParseReport {
    /// 유효한 규칙 (파일 순서)
    pub rules: Vec<SignatureRule>,
    /// 형식 오류 또는 `sid` 누락으로 건너뛴 규칙 수
    pub skipped: usize,
    /// 중복 `sid`로 건너뛴 규칙 수
    pub duplicates: usize,
}

/// 규칙 파서
#[derive(Debug, Clone)]
pub struct RuleParser {
    option: Regex,
}

impl RuleParser {
    pub fn new() -> Result<Self, DetectionError> {
        let option = Regex::new(OPTION_PATTERN).map_err(|e| DetectionError::RuleParse {
            reason: format!("invalid option pattern: {e}"),
        })?;
        Ok(Self { option })
    }

    /// 규칙 파일 전체를 파싱합니다. `origin`은 로그에만 쓰입니다.
    pub fn parse_text(&self, text: &str, origin: &str) -> ParseReport {
        let mut report = ParseReport::default();
        let mut seen = std::collections::HashSet::new();

        for (line_no, rule_text) in logical_lines(text) {
            match self.parse_rule(&rule_text) {
                Ok(rule) => {
                    if !seen.insert(rule.id.clone()) {
                        warn!(
                            origin,
                            line = line_no,
                            rule_id = %rule.id,
                            "duplicate rule id, skipping"
                        );
                        report.duplicates += 1;
                        continue;
                    }
                    report.rules.push(rule);
                }
                Err(e) => {
                    warn!(origin, line = line_no, error = %e, "skipping invalid rule");
                    report.skipped += 1;
                }
            }
        }
        report
    }

    /// 규칙 한 개를 파싱합니다.
    pub fn parse_rule(&self, text: &str) -> Result<SignatureRule, DetectionError> {
        let text = text.trim();
        let open = text.find('(').ok_or_else(|| parse_err("missing option block"))?;
        let close = text
            .rfind(')')
            .filter(|&close| close > open)
            .ok_or_else(|| parse_err("unterminated option block"))?;
        if !text[close + 1..].trim().is_empty() {
            return Err(parse_err("trailing text after option block"));
        }

        let head: Vec<&str> = text[..open].split_whitespace().collect();
        let (protocol, selectors) = match head.len() {
            1 => (head[0], None),
            2 => (head[1], None),
            6 => (head[0], Some(&head[1..])),
            7 => (head[1], Some(&head[2..])),
            n => return Err(parse_err(format!("unexpected header with {n} fields"))),
        };

        let protocols = match protocol.to_ascii_lowercase().as_str() {
            "ip" | "any" => Vec::new(),
            _ => vec![Protocol::parse(protocol)],
        };
        let header = match selectors {
            Some(fields) => parse_header(fields)?,
            None => RuleHeader::any(),
        };

        let mut id = None;
        let mut description = String::new();
        let mut severity = Severity::default();
        for caps in self.option.captures_iter(&text[open + 1..close]) {
            let key = caps.get(1).map_or("", |m| m.as_str()).to_ascii_lowercase();
            let value = caps.get(2).map_or("", |m| m.as_str()).trim();
            match key.as_str() {
                "sid" => id = Some(unquote(value)),
                "msg" => description = unquote(value),
                "severity" => {
                    severity = Severity::from_str_loose(&unquote(value)).ok_or_else(|| {
                        parse_err(format!("unknown severity '{value}'"))
                    })?;
                }
                // 그 밖의 옵션은 무시
                _ => {}
            }
        }

        let id = id
            .filter(|sid| !sid.is_empty())
            .ok_or_else(|| parse_err("missing sid"))?;

        Ok(SignatureRule::new(
            id,
            description,
            severity,
            protocols,
            header,
            text,
        ))
    }
}

fn parse_err(reason: impl Into<String>) -> DetectionError {
    DetectionError::RuleParse {
        reason: reason.into(),
    }
}

/// `\` 이어쓰기를 합친 논리 줄 (시작 줄 번호, 텍스트)
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if pending.is_none() && (line.is_empty() || line.starts_with('#')) {
            continue;
        }
        let (continues, body) = match line.strip_suffix('\\') {
            Some(body) => (true, body.trim_end()),
            None => (false, line),
        };
        let entry = pending.get_or_insert_with(|| (index + 1, String::new()));
        if !entry.1.is_empty() && !body.is_empty() {
            entry.1.push(' ');
        }
        entry.1.push_str(body);

        if !continues
            && let Some(done) = pending.take()
        {
            lines.push(done);
        }
    }
    // 마지막 줄이 `\`로 끝난 경우
    if let Some(done) = pending {
        lines.push(done);
    }
    lines
}

fn parse_header(fields: &[&str]) -> Result<RuleHeader, DetectionError> {
    let [src, src_port, direction, dst, dst_port] = fields else {
        return Err(parse_err("header needs five fields"));
    };
    let bidirectional = match *direction {
        "->" => false,
        "<>" => true,
        other => return Err(parse_err(format!("unknown direction '{other}'"))),
    };
    Ok(RuleHeader {
        src: parse_address(src)?,
        src_port: parse_port(src_port)?,
        dst: parse_address(dst)?,
        dst_port: parse_port(dst_port)?,
        bidirectional,
    })
}

fn parse_address(token: &str) -> Result<AddressSelector, DetectionError> {
    let (negated, body) = match token.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    if body.eq_ignore_ascii_case("any") || body.starts_with('$') {
        return Ok(AddressSelector::Any);
    }
    let network = body
        .parse()
        .map_err(|e| parse_err(format!("invalid address '{token}': {e}")))?;
    Ok(AddressSelector::Network { network, negated })
}

fn parse_port(token: &str) -> Result<PortSelector, DetectionError> {
    let (negated, body) = match token.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    if body.eq_ignore_ascii_case("any") || body.starts_with('$') {
        return Ok(PortSelector::Any);
    }
    let number = |s: &str| {
        s.parse::<u16>()
            .map_err(|e| parse_err(format!("invalid port '{token}': {e}")))
    };
    let (low, high) = match body.split_once(':') {
        Some((lo, hi)) => (
            if lo.is_empty() { 0 } else { number(lo)? },
            if hi.is_empty() { u16::MAX } else { number(hi)? },
        ),
        None => {
            let port = number(body)?;
            (port, port)
        }
    };
    if low > high {
        return Err(parse_err(format!("empty port range '{token}'")));
    }
    Ok(PortSelector::Range { low, high, negated })
}

/// 따옴표를 벗기고 `\"`, `\\`, `\;` 이스케이프를 풉니다.
fn unquote(value: &str) -> String {
    let inner = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\'
            && let Some(next) = chars.next()
        {
            out.push(next);
            continue;
        }
        out.push(c);
    }
    out.trim().to_owned()
}
