//! Title normalization for comparison.
//!
//! Titles arrive from MARCXML, publisher HTML and CSV exports with every
//! possible notation for the same thing: Unicode Greek, LaTeX, HTML
//! sub/superscripts. [`normalize`] maps all of them onto one comparison form.
//! The output is never meant for display.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// Code point substitutions applied before lower-casing.
///
/// Tokens are LaTeX-like so that a Unicode title and its LaTeX spelling in
/// another source converge once `$ { } \` are stripped.
const SYMBOLS: &[(char, &str)] = &[
    // spacing
    ('\u{00a0}', " "),
    ('\u{2009}', " "),
    ('\u{200a}', " "),
    // dashes and operators
    ('\u{2010}', "-"),
    ('\u{2011}', "-"),
    ('\u{2012}', "-"),
    ('\u{2013}', "-"),
    ('\u{2014}', "-"),
    ('\u{2212}', "-"),
    ('\u{ff0b}', "+"),
    ('\u{2217}', "*"),
    ('\u{00d7}', r"$\times$"),
    ('\u{2032}', "'"),
    ('\u{2018}', "'"),
    ('\u{2019}', "'"),
    ('\u{201c}', "\""),
    ('\u{201d}', "\""),
    ('\u{2192}', r"$\Rightarrow$"),
    ('\u{203e}', "$^{-}$"),
    ('\u{00af}', "$^{-}$"),
    ('\u{2113}', r"$\ell$"),
    ('\u{2213}', r"$\mp$"),
    ('\u{00b1}', r"$\pm$"),
    ('\u{2261}', r"$\equiv$"),
    ('\u{2248}', r"$\approx$"),
    ('\u{2264}', r"$\leq$"),
    ('\u{2265}', r"$\geq$"),
    ('\u{221e}', r"$\infty$"),
    ('\u{0305}', r"$\bar$"),
    ('\u{0338}', r"$\not$"),
    ('\u{221a}', r"$\sqrt$"),
    // Greek, lower case
    ('\u{03b1}', r"$\alpha$"),
    ('\u{03b2}', r"$\beta$"),
    ('\u{03b3}', r"$\gamma$"),
    ('\u{03b4}', r"$\delta$"),
    ('\u{03b5}', r"$\epsilon$"),
    ('\u{03b6}', r"$\zeta$"),
    ('\u{03b7}', r"$\eta$"),
    ('\u{03b8}', r"$\theta$"),
    ('\u{03b9}', r"$\iota$"),
    ('\u{03ba}', r"$\kappa$"),
    ('\u{03bb}', r"$\lambda$"),
    ('\u{03bc}', r"$\mu$"),
    ('\u{00b5}', r"$\mu$"),
    ('\u{03bd}', r"$\nu$"),
    ('\u{03be}', r"$\xi$"),
    ('\u{03c0}', r"$\pi$"),
    ('\u{03c1}', r"$\rho$"),
    ('\u{03c2}', r"$\sigma$"),
    ('\u{03c3}', r"$\sigma$"),
    ('\u{03c4}', r"$\tau$"),
    ('\u{03c5}', r"$\upsilon$"),
    ('\u{03c6}', r"$\phi$"),
    ('\u{03d5}', r"$\phi$"),
    ('\u{03c7}', r"$\chi$"),
    ('\u{03c8}', r"$\psi$"),
    ('\u{03c9}', r"$\omega$"),
    // Greek, upper case with their own LaTeX macro
    ('\u{0393}', r"$\Gamma$"),
    ('\u{0394}', r"$\Delta$"),
    ('\u{0398}', r"$\Theta$"),
    ('\u{039b}', r"$\Lambda$"),
    ('\u{039e}', r"$\Xi$"),
    ('\u{03a0}', r"$\Pi$"),
    ('\u{03a3}', r"$\Sigma$"),
    ('\u{03a5}', r"$\Upsilon$"),
    ('\u{03a6}', r"$\Phi$"),
    ('\u{03a8}', r"$\Psi$"),
    ('\u{03a9}', r"$\Omega$"),
];

/// Multi-character ASCII sequences, longest first.
const SEQUENCES: &[(&str, &str)] = &[("-->", r"$\Rightarrow$"), ("->", r"$\Rightarrow$")];

static SUBSCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<sub>(.*?)</sub>").expect("valid subscript regex"));
static SUPERSCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<sup>(.*?)</sup>").expect("valid superscript regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));
static PERIOD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.([a-zA-Z])").expect("valid period regex"));
static COMMA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r",([a-zA-Z])").expect("valid comma regex"));

/// A normalized string plus the non-ASCII code points that had no table entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Normalized {
    /// Canonical comparison form
    pub text: String,
    /// Code points passed through unchanged, sorted and deduplicated
    pub unmapped: Vec<char>,
}

impl Normalized {
    /// True when every non-ASCII code point had a substitution.
    pub fn is_clean(&self) -> bool {
        self.unmapped.is_empty()
    }
}

/// Normalize a title into its comparison form.
///
/// Idempotent: `normalize(&normalize(s)) == normalize(s)`.
pub fn normalize(text: &str) -> String {
    normalize_with_report(text).text
}

/// Normalize and report unmapped code points (the `NormalizationWarning` data).
pub fn normalize_with_report(text: &str) -> Normalized {
    let mut unmapped = BTreeSet::new();
    let mut current = normalize_pass(text, &mut unmapped);

    // Stripping `$ { } \` or tags can splice together a new `->` or `<...>`.
    // Every extra pass removes at least one angle bracket, so this terminates.
    let mut seen_again = BTreeSet::new();
    loop {
        let next = normalize_pass(&current, &mut seen_again);
        if next == current {
            break;
        }
        current = next;
    }

    Normalized {
        text: current,
        unmapped: unmapped.into_iter().collect(),
    }
}

fn normalize_pass(text: &str, unmapped: &mut BTreeSet<char>) -> String {
    let mut out = substitute_symbols(text, unmapped);
    for (from, to) in SEQUENCES {
        if out.contains(from) {
            out = out.replace(from, to);
        }
    }
    let out = out.to_lowercase();
    let out = html_scripts_to_latex(&out);
    let out = TAG_RE.replace_all(&out, "");
    out.chars()
        .filter(|c| !matches!(c, '$' | '{' | '}' | '\\'))
        .collect()
}

fn substitute_symbols(text: &str, unmapped: &mut BTreeSet<char>) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii() {
            out.push(c);
            continue;
        }
        if let Some(token) = symbol_token(c) {
            out.push_str(token);
            continue;
        }
        // Capital letters without their own macro fall back to the lower-case
        // entry, so `Α` and `α` agree.
        let mut lower = c.to_lowercase();
        let folded = match (lower.next(), lower.next()) {
            (Some(l), None) => symbol_token(l),
            _ => None,
        };
        match folded {
            Some(token) => out.push_str(token),
            None => {
                unmapped.insert(c);
                out.push(c);
            }
        }
    }
    out
}

fn symbol_token(c: char) -> Option<&'static str> {
    SYMBOLS
        .iter()
        .find(|(symbol, _)| *symbol == c)
        .map(|(_, token)| *token)
}

/// Convert `<sub>x</sub>` / `<sup>x</sup>` into `$_{x}$` / `$^{x}$`.
pub fn html_scripts_to_latex(text: &str) -> String {
    let text = SUBSCRIPT_RE.replace_all(text, "$$_{${1}}$$");
    SUPERSCRIPT_RE.replace_all(&text, "$$^{${1}}$$").into_owned()
}

/// Display clean-up for abstracts taken from splash pages.
///
/// Collapses whitespace and restores the space publishers drop after
/// `.` and `,` when the markup around sentences is stripped.
pub fn tidy_abstract(text: &str) -> String {
    let text = WHITESPACE_RE.replace_all(text.trim(), " ");
    let text = PERIOD_RE.replace_all(&text, ". $1");
    COMMA_RE.replace_all(&text, ", $1").into_owned()
}
