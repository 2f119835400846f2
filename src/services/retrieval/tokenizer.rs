//! Question tokenization and the Chinese-to-English semantic map
//!
//! Tokenization extracts ASCII word/number runs plus occurrences of a
//! fixed Chinese domain vocabulary (substring match). The semantic map
//! translates those Chinese terms into English fragments that can hit
//! table and column names.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

static ASCII_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z_][a-zA-Z0-9_]*|\d+").unwrap());

/// Chinese domain vocabulary matched as substrings of the question.
pub const CHINESE_KEYWORDS: &[&str] = &[
    "威胁", "域名", "恶意", "黑名单", "在线", "离线", "终端", "节点", "状态",
    "连接", "情况", "统计", "记录", "数据", "文件", "进程", "端口", "漏洞",
    "病毒", "安全", "风险", "告警", "日志", "时间", "今天", "昨天", "趋势",
    "计数", "总数", "分布", "按", "查询", "检索", "搜索", "列表", "详情",
    "用户", "账号", "密码", "弱口令", "攻击", "防护", "监控", "分析",
    "资产", "设备", "主机", "服务器", "网络", "流量", "异常", "事件",
];

/// Fixed Chinese→English semantic map for the EDR domain.
pub static SEMANTIC_MAP: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    let entries: &[(&str, &[&str])] = &[
        ("威胁", &["threat", "malicious", "risk"]),
        ("域名", &["domain", "url", "dns"]),
        ("恶意", &["malicious", "threat", "bad"]),
        ("黑名单", &["blacklist", "block", "deny"]),
        ("在线", &["online", "connected", "active", "statistics"]),
        ("离线", &["offline", "disconnected", "inactive", "statistics"]),
        ("终端", &["node", "endpoint", "terminal", "machine"]),
        ("节点", &["node", "endpoint", "machine"]),
        ("状态", &["status", "state", "statistics"]),
        ("连接", &["connect", "connection", "link", "statistics"]),
        ("情况", &["statistics", "status", "state", "summary"]),
        ("怎么样", &["statistics", "summary", "status"]),
        ("统计", &["statistics", "stat", "count", "summary"]),
        ("记录", &["record", "log", "entry"]),
        ("文件", &["file", "document"]),
        ("进程", &["process", "proc"]),
        ("端口", &["port"]),
        ("漏洞", &["vulnerability", "vuln", "cve"]),
        ("病毒", &["virus", "malware"]),
        ("用户", &["user", "account"]),
        ("密码", &["password", "pwd"]),
        ("弱口令", &["weak", "password"]),
        ("监控", &["monitor", "watch"]),
        ("分析", &["analysis", "analyze"]),
        ("趋势", &["trend", "statistics", "time"]),
        ("总数", &["count", "total", "summary"]),
        ("分布", &["distribution", "group", "statistics"]),
    ];
    entries.iter().copied().collect()
});

/// Question indicators that bias the shortlist towards statistics tables.
pub const STATISTICAL_INDICATORS: &[&str] = &["情况", "怎么样", "统计", "总数", "分布", "趋势"];

/// Question indicators that bias the shortlist towards threat tables.
pub const THREAT_INDICATORS: &[&str] = &["威胁", "恶意", "黑名单"];

/// Tokenize a mixed-script question.
///
/// ASCII word/number runs are lowercased; Chinese tokens are the domain
/// keywords found as substrings. The result is deduplicated, order not
/// significant.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut tokens: Vec<String> = ASCII_TOKEN_RE
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect();

    for keyword in CHINESE_KEYWORDS {
        if text.contains(keyword) {
            tokens.push((*keyword).to_string());
        }
    }

    tokens.sort();
    tokens.dedup();
    tokens
}

/// Expand tokens with their semantic-map translations (union).
pub fn expand_tokens(tokens: &[String]) -> Vec<String> {
    let mut expanded: Vec<String> = tokens.to_vec();
    for token in tokens {
        if let Some(mapped) = SEMANTIC_MAP.get(token.as_str()) {
            expanded.extend(mapped.iter().map(|m| (*m).to_string()));
        }
    }
    expanded.sort();
    expanded.dedup();
    expanded
}
