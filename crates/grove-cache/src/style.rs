//! Style sheets, standalone or bundled in library containers
//!
//! A missing style sheet is not an error: the cache stores the shared
//! [`StyleDocument::empty`] sentinel for it. Consumers tell "not found" from
//! "found but empty" with [`StyleDocument::is_empty_sentinel`].

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use cssparser::{Delimiter, ParseError, Parser, ParserInput, Token};

use crate::container::ContainerCache;
use crate::error::{CacheError, Result};
use crate::key::{CacheStoreKey, container_entry_key};
use crate::store::{CacheStore, CacheStoreBase};

pub const DEFAULTS_STYLE: &str = "defaults.css";
pub const DEFAULTS_STYLE_3_0_0: &str = "defaults-3.0.0.css";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleRule {
    pub selector: String,
    /// The `@media` query the rule is nested in.
    pub media: Option<String>,
    pub declarations: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleDocument {
    pub namespaces: Vec<(String, String)>,
    pub rules: Vec<StyleRule>,
}

static EMPTY_STYLE_DOCUMENT: LazyLock<Arc<StyleDocument>> = LazyLock::new(|| Arc::new(StyleDocument::default()));

type CssError<'i> = ParseError<'i, ()>;

impl StyleDocument {
    /// The "no such style sheet" sentinel. Always the same allocation.
    pub fn empty() -> Arc<StyleDocument> {
        Arc::clone(&EMPTY_STYLE_DOCUMENT)
    }

    pub fn is_empty_sentinel(document: &Arc<StyleDocument>) -> bool {
        Arc::ptr_eq(document, &EMPTY_STYLE_DOCUMENT)
    }

    /// Parse style source. Any problem fails the whole document.
    pub fn parse(name: &str, source: &str) -> Result<StyleDocument> {
        let mut problems = Vec::new();
        let mut document = StyleDocument::default();
        let mut input = ParserInput::new(source);
        let mut parser = Parser::new(&mut input);
        parse_rules(&mut parser, None, &mut document, &mut problems);

        if !problems.is_empty() {
            return Err(CacheError::Parse {
                path: name.to_string(),
                problems,
            });
        }
        Ok(document)
    }

    /// The first rule for `selector` outside any media query.
    pub fn rule(&self, selector: &str) -> Option<&StyleRule> {
        self.rules
            .iter()
            .find(|rule| rule.media.is_none() && rule.selector == selector)
    }

    pub fn media_rules<'a>(&'a self, query: &'a str) -> impl Iterator<Item = &'a StyleRule> + 'a {
        self.rules
            .iter()
            .filter(move |rule| rule.media.as_deref() == Some(query))
    }
}

fn problem(what: &str, error: &CssError<'_>) -> String {
    format!("{what} at line {}: {:?}", error.location.line + 1, error.kind)
}

fn skip_rest<'i>(parser: &mut Parser<'i, '_>) -> std::result::Result<(), CssError<'i>> {
    while parser.next().is_ok() {}
    Ok(())
}

fn parse_rules<'i>(
    parser: &mut Parser<'i, '_>,
    media: Option<&str>,
    document: &mut StyleDocument,
    problems: &mut Vec<String>,
) {
    loop {
        parser.skip_whitespace();
        let start = parser.position();
        let location = parser.current_source_location();
        let token = match parser.next() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };

        match token {
            Token::AtKeyword(name) if name.eq_ignore_ascii_case("namespace") => {
                match parser.parse_until_after(Delimiter::Semicolon, |p| parse_namespace(p)) {
                    Ok(namespace) => document.namespaces.push(namespace),
                    Err(e) => problems.push(problem("malformed @namespace", &e)),
                }
            }
            Token::AtKeyword(name) => {
                let prelude_start = parser.position();
                let _ = parser.parse_until_before(Delimiter::CurlyBracketBlock | Delimiter::Semicolon, |p| skip_rest(p));
                let prelude = parser.slice_from(prelude_start).trim().to_string();
                let has_block = parser
                    .next()
                    .is_ok_and(|token| matches!(token, Token::CurlyBracketBlock));
                if !has_block {
                    // Statement at-rules such as @charset.
                    continue;
                }
                if name.eq_ignore_ascii_case("media") {
                    let _ = parser.parse_nested_block(|block| {
                        parse_rules(block, Some(&prelude), document, problems);
                        Ok::<(), CssError<'i>>(())
                    });
                } else {
                    let selector = format!("@{} {}", name, prelude).trim_end().to_string();
                    let declarations = parse_block(parser, &selector, problems);
                    document.rules.push(StyleRule {
                        selector,
                        media: media.map(str::to_string),
                        declarations,
                    });
                }
            }
            Token::CurlyBracketBlock => {
                problems.push(format!("missing selector before `{{` at line {}", location.line + 1));
            }
            _ => {
                let _ = parser.parse_until_before(Delimiter::CurlyBracketBlock | Delimiter::Semicolon, |p| skip_rest(p));
                let selector = parser.slice_from(start).trim().to_string();
                let has_block = parser
                    .next()
                    .is_ok_and(|token| matches!(token, Token::CurlyBracketBlock));
                if !has_block {
                    problems.push(format!("expected `{{` after `{selector}` at line {}", location.line + 1));
                    continue;
                }
                let declarations = parse_block(parser, &selector, problems);
                document.rules.push(StyleRule {
                    selector,
                    media: media.map(str::to_string),
                    declarations,
                });
            }
        }
    }
}

/// `@namespace prefix "uri";` or `@namespace url(uri);` without the keyword.
fn parse_namespace<'i>(parser: &mut Parser<'i, '_>) -> std::result::Result<(String, String), CssError<'i>> {
    let prefix = parser.try_parse(|p| p.expect_ident_cloned()).ok();
    let uri = parser.expect_url_or_string()?;
    parser.expect_exhausted()?;
    Ok((prefix.map(|prefix| prefix.to_string()).unwrap_or_default(), uri.to_string()))
}

/// Declarations of the block whose `{` was just consumed.
fn parse_block<'i>(parser: &mut Parser<'i, '_>, selector: &str, problems: &mut Vec<String>) -> Vec<(String, String)> {
    let parsed = parser.parse_nested_block(|block| {
        let mut declarations = Vec::new();
        loop {
            block.skip_whitespace();
            if block.is_exhausted() {
                break;
            }
            if block.try_parse(|p| p.expect_semicolon()).is_ok() {
                continue;
            }
            match block.parse_until_after(Delimiter::Semicolon, |p| parse_declaration(p)) {
                Ok(declaration) => declarations.push(declaration),
                Err(e) => problems.push(problem(&format!("malformed declaration in `{selector}`"), &e)),
            }
        }
        Ok::<_, CssError<'i>>(declarations)
    });
    parsed.unwrap_or_default()
}

fn parse_declaration<'i>(parser: &mut Parser<'i, '_>) -> std::result::Result<(String, String), CssError<'i>> {
    let property = parser.expect_ident_cloned()?;
    parser.expect_colon()?;
    let start = parser.position();
    skip_rest(parser)?;
    let value = parser.slice_from(start).trim();
    if value.is_empty() {
        return Err(parser.new_custom_error(()));
    }
    Ok((property.to_string(), value.to_string()))
}

/// Identity of a style sheet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StyleKey {
    /// A file bundled in a library container.
    Bundled { container: String, file: String },
    /// A style sheet on disk.
    Standalone { path: String },
}

impl CacheStoreKey for StyleKey {
    fn generate_key(&self) -> String {
        match self {
            StyleKey::Bundled { container, file } => container_entry_key(container, file),
            StyleKey::Standalone { path } => path.clone(),
        }
    }
}

/// Language compatibility version requested by a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompatibilityVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl CompatibilityVersion {
    pub const V3_0_0: CompatibilityVersion = CompatibilityVersion::new(3, 0, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        CompatibilityVersion { major, minor, patch }
    }
}

impl fmt::Display for CompatibilityVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for CompatibilityVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = s.trim().split('.').map(|part| part.parse::<u32>());
        let mut next = || match parts.next() {
            Some(Ok(n)) => Ok(n),
            Some(Err(_)) => Err(format!("invalid compatibility version `{s}`")),
            None => Ok(0),
        };
        let version = CompatibilityVersion::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(format!("invalid compatibility version `{s}`"));
        }
        Ok(version)
    }
}

/// Which defaults style sheet a compatibility version asks for.
pub fn defaults_style_file(version: Option<CompatibilityVersion>) -> &'static str {
    match version {
        Some(version) if version <= CompatibilityVersion::V3_0_0 => DEFAULTS_STYLE_3_0_0,
        _ => DEFAULTS_STYLE,
    }
}

/// Parsed style sheets, reading bundled ones through the container cache.
pub struct StyleCache {
    store: CacheStore<StyleDocument>,
    containers: Arc<ContainerCache>,
}

impl StyleCache {
    pub fn new(containers: Arc<ContainerCache>, soft_limit: Option<usize>) -> Self {
        StyleCache {
            store: CacheStore::with_soft_limit("styles", soft_limit),
            containers,
        }
    }

    /// The defaults style sheet of `container` for a compatibility version.
    ///
    /// Falls back to the plain defaults sheet when the container has no
    /// version-specific one. `None` when the container has neither.
    pub fn defaults_style(
        &self,
        container: &str,
        version: Option<CompatibilityVersion>,
    ) -> Result<Option<Arc<StyleDocument>>> {
        let key = StyleKey::Bundled {
            container: container.to_string(),
            file: defaults_style_file(version).to_string(),
        };
        let document = self.get(&key)?;
        if !StyleDocument::is_empty_sentinel(&document) {
            return Ok(Some(document));
        }
        match version {
            Some(_) => self.defaults_style(container, None),
            None => Ok(None),
        }
    }

    pub fn remove_file(&self, path: &str) -> usize {
        self.store.remove_for_file(path)
    }
}

impl CacheStoreBase for StyleCache {
    type Key = StyleKey;
    type Value = StyleDocument;
    type Error = CacheError;

    fn store(&self) -> &CacheStore<StyleDocument> {
        &self.store
    }

    fn create_entry_value(&self, key: &StyleKey) -> Result<Arc<StyleDocument>> {
        let name = key.generate_key();
        let source = match key {
            StyleKey::Bundled { container, file } => match self.containers.get(container) {
                Ok(library) => library.file(file).map(str::to_string),
                Err(CacheError::Io { .. } | CacheError::Decode { .. }) => {
                    tracing::debug!("container {} unreadable, no style sheet {}", container, file);
                    None
                }
                Err(e) => return Err(e),
            },
            StyleKey::Standalone { path } => std::fs::read_to_string(path).ok(),
        };

        match source {
            Some(source) => StyleDocument::parse(&name, &source).map(Arc::new),
            None => Ok(StyleDocument::empty()),
        }
    }
}
