//! Pointcut rules: a small expression language selecting targets
//!
//! ```text
//! @Auditable                     tag on the operation
//! @annotation(Auditable)         same
//! @within(Service)               tag on the owning type
//! execution(find*)               glob over the operation name
//! execution(OrderService.*)      glob over `Owner.operation`
//! within(*Service)               glob over the owner type (alias: bean)
//! Auditable                      bare tag name
//! a && b, a || b, !a, (a)
//! ```

use crate::error::{WeaverError, WeaverResult};
use crate::intercept::advice::Target;
use globset::{Glob, GlobMatcher};
use std::fmt;
use std::str::FromStr;

/// Compiled glob with its source text
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    matcher: GlobMatcher,
}

impl Pattern {
    fn compile(rule: &str, source: &str) -> WeaverResult<Self> {
        let glob = Glob::new(source)
            .map_err(|e| WeaverError::invalid_rule(rule, format!("bad pattern '{}': {}", source, e)))?;
        Ok(Self {
            source: source.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.matcher.is_match(candidate)
    }
}

/// Parsed match expression
#[derive(Debug, Clone)]
pub enum Rule {
    /// Operation carries the tag
    Tag(String),
    /// Owning type carries the tag
    OwnerTag(String),
    /// Glob over the operation name, or over `Owner.operation` when it contains a '.'
    Execution(Pattern),
    /// Glob over the owner type name
    Within(Pattern),
    And(Box<Rule>, Box<Rule>),
    Or(Box<Rule>, Box<Rule>),
    Not(Box<Rule>),
}

impl Rule {
    /// Parse a rule; empty or malformed input yields `InvalidRule`
    pub fn parse(input: &str) -> WeaverResult<Self> {
        if input.trim().is_empty() {
            return Err(WeaverError::invalid_rule(input, "rule is empty"));
        }
        let mut parser = Parser {
            rule: input,
            chars: input.char_indices().collect(),
            pos: 0,
            depth: 0,
            terms: 0,
        };
        let rule = parser.parse_or()?;
        parser.skip_ws();
        if parser.pos < parser.chars.len() {
            return Err(parser.error(format!(
                "unexpected input at offset {}",
                parser.offset()
            )));
        }
        Ok(rule)
    }

    pub fn matches(&self, target: &Target) -> bool {
        match self {
            Rule::Tag(name) => target.has_tag(name),
            Rule::OwnerTag(name) => target.has_owner_tag(name),
            Rule::Execution(pattern) => {
                if pattern.source.contains('.') {
                    pattern.is_match(&target.id())
                } else {
                    pattern.is_match(target.operation())
                }
            }
            Rule::Within(pattern) => pattern.is_match(target.owner()),
            Rule::And(a, b) => a.matches(target) && b.matches(target),
            Rule::Or(a, b) => a.matches(target) || b.matches(target),
            Rule::Not(inner) => !inner.matches(target),
        }
    }
}

impl FromStr for Rule {
    type Err = WeaverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rule::parse(s)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Tag(name) => write!(f, "@{}", name),
            Rule::OwnerTag(name) => write!(f, "@within({})", name),
            Rule::Execution(p) => write!(f, "execution({})", p.source),
            Rule::Within(p) => write!(f, "within({})", p.source),
            Rule::And(a, b) => write!(f, "({} && {})", a, b),
            Rule::Or(a, b) => write!(f, "({} || {})", a, b),
            Rule::Not(inner) => write!(f, "!{}", inner),
        }
    }
}

/// Deepest `!`/parenthesis nesting a rule may use
pub const MAX_RULE_DEPTH: usize = 64;
/// Most tags and designators a single rule may combine
pub const MAX_RULE_TERMS: usize = 256;

struct Parser<'a> {
    rule: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    depth: usize,
    terms: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: impl Into<String>) -> WeaverError {
        WeaverError::invalid_rule(self.rule, reason)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|(offset, _)| *offset)
            .unwrap_or(self.rule.len())
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        let matches = token
            .chars()
            .enumerate()
            .all(|(i, c)| self.chars.get(self.pos + i).map(|(_, x)| *x) == Some(c));
        if matches {
            self.pos += token.chars().count();
        }
        matches
    }

    fn parse_or(&mut self) -> WeaverResult<Rule> {
        let mut left = self.parse_and()?;
        while self.eat("||") {
            let right = self.parse_and()?;
            left = Rule::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> WeaverResult<Rule> {
        let mut left = self.parse_unary()?;
        while self.eat("&&") {
            let right = self.parse_unary()?;
            left = Rule::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> WeaverResult<Rule> {
        if self.eat("!") {
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Rule::Not(Box::new(inner)));
        }
        if self.eat("(") {
            self.descend()?;
            let inner = self.parse_or()?;
            if !self.eat(")") {
                return Err(self.error("missing closing ')'"));
            }
            self.depth -= 1;
            return Ok(inner);
        }
        self.terms += 1;
        if self.terms > MAX_RULE_TERMS {
            return Err(self.error(format!("more than {} terms", MAX_RULE_TERMS)));
        }
        self.parse_atom()
    }

    fn descend(&mut self) -> WeaverResult<()> {
        self.depth += 1;
        if self.depth > MAX_RULE_DEPTH {
            return Err(self.error(format!("nesting deeper than {}", MAX_RULE_DEPTH)));
        }
        Ok(())
    }

    fn word(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '$' | '*' | '?'))
        {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().map(|(_, c)| *c).collect()
    }

    fn argument(&mut self) -> WeaverResult<String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == ')' {
                let arg: String = self.chars[start..self.pos].iter().map(|(_, c)| *c).collect();
                self.pos += 1;
                let arg = arg.trim().to_string();
                if arg.is_empty() {
                    return Err(self.error("empty designator argument"));
                }
                return Ok(arg);
            }
            if c == '(' {
                return Err(self.error("nested parentheses in designator argument"));
            }
            self.pos += 1;
        }
        Err(self.error("unterminated designator argument"))
    }

    fn parse_atom(&mut self) -> WeaverResult<Rule> {
        self.skip_ws();
        let annotated = self.eat("@");
        let word = self.word();
        if word.is_empty() {
            return Err(self.error(format!("expected a tag or designator at offset {}", self.offset())));
        }

        if !self.eat("(") {
            return Ok(Rule::Tag(simple_name(&word).to_string()));
        }

        let arg = self.argument()?;
        match (annotated, word.as_str()) {
            (true, "annotation") => Ok(Rule::Tag(simple_name(&arg).to_string())),
            (true, "within") => Ok(Rule::OwnerTag(simple_name(&arg).to_string())),
            (false, "execution") => Ok(Rule::Execution(Pattern::compile(self.rule, &arg)?)),
            (false, "within") | (false, "bean") => {
                Ok(Rule::Within(Pattern::compile(self.rule, &arg)?))
            }
            (true, other) => Err(self.error(format!("unknown designator '@{}'", other))),
            (false, other) => Err(self.error(format!("unknown designator '{}'", other))),
        }
    }
}

/// `com.example.Auditable` -> `Auditable`
fn simple_name(qualified: &str) -> &str {
    qualified.rsplit('.').next().unwrap_or(qualified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn order_create() -> Target {
        Target::new("OrderService", "createOrder")
            .tagged("Auditable")
            .tagged("Secured")
            .owner_tagged("Service")
    }

    fn order_status() -> Target {
        Target::new("OrderService", "getOrderStatus").owner_tagged("Service")
    }

    fn repo_find() -> Target {
        Target::new("UserRepository", "findByEmail").owner_tagged("Repository")
    }

    #[test]
    fn tag_forms_are_equivalent() {
        for rule in ["@Auditable", "@annotation(Auditable)", "Auditable", "@annotation(com.example.aop.Auditable)"] {
            let rule = Rule::parse(rule).unwrap();
            assert!(rule.matches(&order_create()), "{rule}");
            assert!(!rule.matches(&order_status()), "{rule}");
        }
    }

    #[test]
    fn execution_globs() {
        let by_name = Rule::parse("execution(find*)").unwrap();
        assert!(by_name.matches(&repo_find()));
        assert!(!by_name.matches(&order_create()));

        let by_id = Rule::parse("execution(OrderService.*)").unwrap();
        assert!(by_id.matches(&order_create()));
        assert!(by_id.matches(&order_status()));
        assert!(!by_id.matches(&repo_find()));
    }

    #[test]
    fn within_and_owner_tags() {
        assert!(Rule::parse("within(*Service)").unwrap().matches(&order_status()));
        assert!(!Rule::parse("bean(*Service)").unwrap().matches(&repo_find()));
        assert!(Rule::parse("@within(Repository)").unwrap().matches(&repo_find()));
    }

    #[test]
    fn combinators() {
        let rule = Rule::parse("@within(Service) || @within(Repository)").unwrap();
        assert!(rule.matches(&order_status()));
        assert!(rule.matches(&repo_find()));

        let rule = Rule::parse("within(*Service) && !@Auditable").unwrap();
        assert!(rule.matches(&order_status()));
        assert!(!rule.matches(&order_create()));

        let rule = Rule::parse("within(*) && execution(*) && !(execution(get*) || @Secured)").unwrap();
        assert!(!rule.matches(&order_status()));
        assert!(!rule.matches(&order_create()));
        assert!(rule.matches(&repo_find()));
    }

    #[test]
    fn rejects_empty_and_malformed() {
        for bad in [
            "",
            "   ",
            "@",
            "execution()",
            "execution(find*",
            "frobnicate(x)",
            "@bogus(x)",
            "@Auditable &&",
            "(@Auditable",
            "@Auditable )",
        ] {
            assert_matches!(
                Rule::parse(bad),
                Err(WeaverError::InvalidRule { .. }),
                "expected '{}' to be rejected",
                bad
            );
        }
    }

    #[test]
    fn nesting_and_size_are_bounded() {
        let deep_not = format!("{}@Auditable", "!".repeat(50_000));
        assert_matches!(Rule::parse(&deep_not), Err(WeaverError::InvalidRule { .. }));

        let deep_parens = format!("{}@Auditable{}", "(".repeat(50_000), ")".repeat(50_000));
        let err = Rule::parse(&deep_parens).unwrap_err();
        assert!(err.to_string().contains("nesting deeper than"));

        let long_chain = vec!["@Auditable"; MAX_RULE_TERMS + 1].join(" && ");
        assert_matches!(Rule::parse(&long_chain), Err(WeaverError::InvalidRule { .. }));

        let at_limit = format!(
            "{}@Auditable{}",
            "!(".repeat(MAX_RULE_DEPTH / 2),
            ")".repeat(MAX_RULE_DEPTH / 2)
        );
        assert!(Rule::parse(&at_limit).unwrap().matches(&order_create()));
        assert!(Rule::parse(&vec!["@Auditable"; MAX_RULE_TERMS].join(" || ")).is_ok());
    }

    #[test]
    fn display_round_trips_meaning() {
        let rule = Rule::parse("within(*Service) && !@Auditable").unwrap();
        let reparsed = Rule::parse(&rule.to_string()).unwrap();
        assert_eq!(reparsed.matches(&order_status()), rule.matches(&order_status()));
        assert_eq!(reparsed.matches(&order_create()), rule.matches(&order_create()));
    }
}
