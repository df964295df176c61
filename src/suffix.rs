use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use rustc_hash::FxHashSet;
use tracing::info;

/// Full public suffix list, used unless another copy is configured.
const BUNDLED_LIST: &str = include_str!("../data/public_suffix_list.dat");

/// Answers "where does the publicly registrable part of a name begin".
///
/// Implementations follow the public suffix list matching algorithm:
///
/// 1. Exception rules (`!foo.bar`) take priority over every other rule; the
///    public suffix is the exception with its leftmost label removed.
/// 2. Otherwise the matching rule with the most labels wins. A wildcard rule
///    `*.bar` matches any single label directly under `bar`.
/// 3. If nothing matches, the implicit rule `*` applies and the public suffix
///    is the rightmost label.
///
/// `domain` is expected lowercased, without a trailing dot and with no empty
/// labels; [`registrable_domain`] takes care of that.
pub trait SuffixList: Send + Sync {
    /// Returns the public suffix of `domain` as a subslice of it.
    fn public_suffix<'a>(&self, domain: &'a str) -> &'a str;
}

#[derive(Debug, Default)]
pub struct PublicSuffixList {
    rules: FxHashSet<String>,
    // stored without the leading "*."
    wildcards: FxHashSet<String>,
    // stored without the leading "!"
    exceptions: FxHashSet<String>,
}

impl PublicSuffixList {
    /// Parses the `public_suffix_list.dat` text format. Only the first
    /// whitespace-delimited token of each line is significant; `//` lines are
    /// comments.
    pub fn parse(text: &str) -> Result<Self> {
        let mut list = Self::default();
        for (lineno, line) in text.lines().enumerate() {
            let Some(token) = line.split_whitespace().next() else {
                continue;
            };
            if token.starts_with("//") {
                continue;
            }
            let rule = token.trim_end_matches('.').to_ascii_lowercase();
            if let Some(exception) = rule.strip_prefix('!') {
                if exception.is_empty() {
                    bail!("empty exception rule at line {}", lineno + 1);
                }
                list.exceptions.insert(exception.to_string());
            } else if let Some(parent) = rule.strip_prefix("*.") {
                list.wildcards.insert(parent.to_string());
            } else if rule.contains('*') {
                bail!("unsupported wildcard placement {:?} at line {}", rule, lineno + 1);
            } else {
                list.rules.insert(rule);
            }
        }
        if list.is_empty() {
            bail!("public suffix list contains no rules");
        }
        Ok(list)
    }

    pub fn bundled() -> Result<Self> {
        Self::parse(BUNDLED_LIST).context("parse bundled public suffix list")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read public suffix list: {}", path.display()))?;
        let list = Self::parse(&raw)
            .with_context(|| format!("parse public suffix list: {}", path.display()))?;
        info!(path = %path.display(), rules = list.len(), "public suffix list loaded");
        Ok(list)
    }

    pub fn len(&self) -> usize {
        self.rules.len() + self.wildcards.len() + self.exceptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SuffixList for PublicSuffixList {
    fn public_suffix<'a>(&self, domain: &'a str) -> &'a str {
        let mut exception: Option<&'a str> = None;
        let mut longest: Option<&'a str> = None;

        // Walk candidate suffixes from the whole name down to the last label,
        // so the first rule hit is also the longest one.
        let mut candidate = domain;
        loop {
            let parent = candidate.find('.').map(|idx| &candidate[idx + 1..]);
            if exception.is_none() && self.exceptions.contains(candidate) {
                exception = Some(parent.unwrap_or(candidate));
            }
            if longest.is_none() {
                let wildcard_hit = parent.is_some_and(|p| self.wildcards.contains(p));
                if wildcard_hit || self.rules.contains(candidate) {
                    longest = Some(candidate);
                }
            }
            match parent {
                Some(p) => candidate = p,
                None => break,
            }
        }

        exception.or(longest).unwrap_or(candidate)
    }
}

/// Computes the effective TLD plus one label (the registrable domain).
///
/// Fails for empty or malformed names and for names that are themselves a
/// public suffix. The result is lowercase.
pub fn registrable_domain(list: &dyn SuffixList, raw: &str) -> Result<String> {
    let domain = raw.strip_suffix('.').unwrap_or(raw).to_ascii_lowercase();
    if domain.is_empty() {
        bail!("empty domain");
    }
    if domain.split('.').any(str::is_empty) {
        bail!("empty label in domain {:?}", raw);
    }

    let suffix = list.public_suffix(&domain);
    if suffix.len() == domain.len() {
        bail!("{:?} is a public suffix", raw);
    }

    // Everything left of the suffix ends with '.', the label before it is the "+1".
    let prefix = &domain[..domain.len() - suffix.len() - 1];
    let start = prefix.rfind('.').map_or(0, |idx| idx + 1);
    Ok(domain[start..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(text: &str) -> PublicSuffixList {
        PublicSuffixList::parse(text).expect("parse list")
    }

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        let psl = list("// header\n\ncom\n*.ck\n!www.ck\n  // indented comment\nuk extra tokens\n");
        assert_eq!(psl.len(), 4);
        assert!(psl.rules.contains("com"));
        assert!(psl.rules.contains("uk"));
        assert!(psl.wildcards.contains("ck"));
        assert!(psl.exceptions.contains("www.ck"));
    }

    #[test]
    fn parse_rejects_empty_and_odd_wildcards() {
        assert!(PublicSuffixList::parse("// nothing here\n").is_err());
        assert!(PublicSuffixList::parse("foo.*.bar\n").is_err());
        assert!(PublicSuffixList::parse("!\n").is_err());
    }

    #[test]
    fn longest_rule_wins() {
        let psl = list("uk\nco.uk\nau\ncom.au\n");
        assert_eq!(psl.public_suffix("a.b.co.uk"), "co.uk");
        assert_eq!(psl.public_suffix("b.uk"), "uk");
        assert_eq!(psl.public_suffix("x.com.au"), "com.au");
        assert_eq!(psl.public_suffix("testingcom.au"), "au");
    }

    #[test]
    fn wildcard_and_exception_rules() {
        let psl = list("jp\n*.kobe.jp\n!city.kobe.jp\n");
        assert_eq!(psl.public_suffix("www.example.kobe.jp"), "example.kobe.jp");
        assert_eq!(psl.public_suffix("www.city.kobe.jp"), "kobe.jp");
        assert_eq!(psl.public_suffix("city.kobe.jp"), "kobe.jp");
        assert_eq!(psl.public_suffix("kobe.jp"), "jp");
    }

    #[test]
    fn implicit_star_rule_for_unlisted_tld() {
        let psl = list("com\n");
        assert_eq!(psl.public_suffix("foo.example.internal"), "internal");
        assert_eq!(psl.public_suffix("localhost"), "localhost");
    }

    #[test]
    fn registrable_domain_cases() {
        let psl = list("com\nau\ncom.au\nuk\nco.uk\n*.ck\n!www.ck\n");
        let etld1 = |raw: &str| registrable_domain(&psl, raw).ok();

        assert_eq!(etld1("subdomain.testingcom.au").as_deref(), Some("testingcom.au"));
        assert_eq!(etld1("subdomain.testingcom.co.uk").as_deref(), Some("testingcom.co.uk"));
        assert_eq!(etld1("SubDoMain.DoMain.COM").as_deref(), Some("domain.com"));
        assert_eq!(etld1("www.example.com.").as_deref(), Some("example.com"));
        assert_eq!(etld1("a.b.c.example.ck").as_deref(), Some("c.example.ck"));
        assert_eq!(etld1("www.ck").as_deref(), Some("www.ck"));

        assert_eq!(etld1("localhost"), None);
        assert_eq!(etld1("co.uk"), None);
        assert_eq!(etld1(""), None);
        assert_eq!(etld1("."), None);
        assert_eq!(etld1("a..example.com"), None);
        assert_eq!(etld1(".example.com"), None);
    }

    #[test]
    fn bundled_list_covers_common_suffixes() {
        let psl = PublicSuffixList::bundled().expect("bundled list");
        let etld1 = |raw: &str| registrable_domain(&psl, raw).unwrap_or_default();

        assert_eq!(etld1("subdomain.testingcom.au"), "testingcom.au");
        assert_eq!(etld1("subdomain.testingcom.co.uk"), "testingcom.co.uk");
        assert_eq!(etld1("www.bbc.co.uk"), "bbc.co.uk");
        assert_eq!(etld1("mail.google.com"), "google.com");
        assert_eq!(etld1("user.github.io"), "user.github.io");
        assert_eq!(etld1("localhost"), "");
    }

    #[test]
    fn bundled_list_covers_country_second_levels() {
        let psl = PublicSuffixList::bundled().expect("bundled list");
        let etld1 = |raw: &str| registrable_domain(&psl, raw).unwrap_or_default();

        assert_eq!(etld1("www.google.com.tr"), "google.com.tr");
        assert_eq!(etld1("www.ynet.co.il"), "ynet.co.il");
        assert_eq!(etld1("www.uol.org.br"), "uol.org.br");
        assert_eq!(etld1("portal.gov.in"), "portal.gov.in");
        assert_eq!(etld1("www.example.com.pk"), "example.com.pk");
        assert_eq!(etld1("com.tr"), "");
        // wildcard and exception rules from the real list
        assert_eq!(etld1("a.b.example.ck"), "b.example.ck");
        assert_eq!(etld1("www.city.kobe.jp"), "city.kobe.jp");
        // internationalized rules match their punycode form
        assert_eq!(etld1("shop.example.xn--55qx5d.cn"), "example.xn--55qx5d.cn");
        assert!(psl.len() > 9000);
    }
}
