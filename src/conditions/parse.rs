//! The condition string grammar.
//!
//! Leaves are phrases such as `task 'fetch' has succeeded today`,
//! `daily after 10:00` or `scheduler has more than 3 cycles`, combined
//! with `&`, `|`, `~` and parentheses (`~` binds tightest, then `&`).
//! Task names are quoted with single or double quotes; operators inside
//! quotes are part of the phrase.

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use regex::{Captures, Regex};
use serde_json::Value;

use crate::conditions::display::ADVERBS;
use crate::conditions::{CmpOp, Comparison, Condition, DependKind, HistoryKind};
use crate::error::{ParseError, PeriodError};
use crate::time::period::DATETIME_FORMAT;
use crate::time::{
    AnchoredInterval, Scope, StaticInterval, TimeDelta, TimePeriod, TimeSpanDelta, parse_duration,
};

const NAME: &str = r#"('[^']*'|"[^"]*")"#;

fn regex(pattern: &str) -> Regex {
    let pattern = pattern.replace("NAME", NAME);
    Regex::new(&format!("(?i)^{pattern}$")).expect("condition pattern is valid")
}

static COMPARISON: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(.*?)\s*(==|!=|<=|>=|<|>)\s*(\d+)\s*"));
static HISTORY: LazyLock<Regex> = LazyLock::new(|| {
    regex(concat!(
        r"(?:task NAME\s+)?has\s+",
        r"(started|succeeded|failed|terminated|inacted|finished)(?:\s+(.+))?",
    ))
});
static RUNNING: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(?:task NAME\s+)?is\s+running(?:\s+(.+))?"));
static DEPEND: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"(?:task NAME\s+)?after\s+task\s+NAME(?:\s+(succeeded|failed|finished))?")
});
static DEPEND_MANY: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"after\s+(all|any)\s+tasks\s+(.+?)(?:\s+(succeeded|failed|finished))?")
});
static NAMES: LazyLock<Regex> = LazyLock::new(|| Regex::new(NAME).expect("name pattern is valid"));
static EXECUTABLE: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"(?:task NAME\s+)?is\s+executable\s+(.+?)(?:\s+with\s+(\d+)\s+retries)?")
});
static RUNNABLE: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(?:task NAME\s+)?is\s+runnable\s+(.+)"));
static RETRY: LazyLock<Regex> = LazyLock::new(|| regex(r"(?:task NAME\s+)?retry\s+(\d+)"));
static EVERY: LazyLock<Regex> =
    LazyLock::new(|| regex(r"every\s+(.+?)(?:\s+based\s+(success|fail|finish))?"));
static ADVERB: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"(secondly|minutely|hourly|daily|weekly|monthly|yearly)(?:\s+(.+))?")
});
static TIME_OF: LazyLock<Regex> = LazyLock::new(|| regex(r"time\s+of\s+(\w+)(?:\s+(.+))?"));
static TIME_IN: LazyLock<Regex> = LazyLock::new(|| regex(r"time\s+in\s+(.+)"));
static THIS: LazyLock<Regex> = LazyLock::new(|| regex(r"this\s+(\w+)"));
static CRON: LazyLock<Regex> = LazyLock::new(|| regex(r"cron\s+(.+)"));
static CYCLES_WORDS: LazyLock<Regex> =
    LazyLock::new(|| regex(r"scheduler\s+has\s+(more|less)\s+than\s+(\d+)\s+cycles"));
static CYCLES: LazyLock<Regex> =
    LazyLock::new(|| regex(r"scheduler\s+cycles\s*(==|!=|<=|>=|<|>)\s*(\d+)"));
static STARTED: LazyLock<Regex> = LazyLock::new(|| regex(r"scheduler\s+started\s+(.+)"));
static PARAM_EXISTS: LazyLock<Regex> = LazyLock::new(|| regex(r"param\s+NAME\s+exists"));
static PARAM_IS: LazyLock<Regex> = LazyLock::new(|| regex(r"param\s+NAME\s+is\s+(.+)"));
static ENV: LazyLock<Regex> = LazyLock::new(|| regex(r"env\s+NAME"));
static BETWEEN: LazyLock<Regex> = LazyLock::new(|| regex(r"between\s+(.+?)\s+and\s+(.+)"));
static QUALIFIER: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(after|before|starting|on|at)\s+(.+)"));
static DELTA: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"(?:past\s+(.+?))?\s*(?:future\s+(.+?))?(?:\s+around\s+(.+))?")
});
static SPAN: LazyLock<Regex> =
    LazyLock::new(|| regex(r"span\s+(.+?)\s+to\s+(.+?)(?:\s+from\s+(.+))?"));
static STATIC: LazyLock<Regex> = LazyLock::new(|| regex(r"from\s+(.+?)\s+to\s+(.+)"));

/// Parse a condition string.
pub fn parse(input: &str) -> Result<Condition, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let cond = parser.expr()?;
    match parser.tokens.get(parser.pos) {
        None => Ok(cond),
        Some(token) => Err(token.unexpected()),
    }
}

impl FromStr for Condition {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

// ── Tokens ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    And(usize),
    Or(usize),
    Not(usize),
    Open(usize),
    Close(usize),
    Leaf(String, usize),
}

impl Token {
    fn unexpected(&self) -> ParseError {
        let (token, position) = match self {
            Self::And(p) => ("&".to_string(), *p),
            Self::Or(p) => ("|".to_string(), *p),
            Self::Not(p) => ("~".to_string(), *p),
            Self::Open(p) => ("(".to_string(), *p),
            Self::Close(p) => (")".to_string(), *p),
            Self::Leaf(text, p) => (text.clone(), *p),
        };
        ParseError::UnexpectedToken { token, position }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut quote: Option<char> = None;
    let mut leaf_start = 0;

    let flush = |tokens: &mut Vec<Token>, start: usize, end: usize| {
        let text = &input[start..end];
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            let offset = text.len() - text.trim_start().len();
            tokens.push(Token::Leaf(trimmed.to_string(), start + offset));
        }
    };

    for (i, c) in input.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        let op = match c {
            '\'' | '"' => {
                quote = Some(c);
                continue;
            }
            '&' => Token::And(i),
            '|' => Token::Or(i),
            '~' => Token::Not(i),
            '(' => Token::Open(i),
            ')' => Token::Close(i),
            _ => continue,
        };
        flush(&mut tokens, leaf_start, i);
        tokens.push(op);
        leaf_start = i + c.len_utf8();
    }
    if quote.is_some() {
        return Err(ParseError::UnbalancedQuotes(input.to_string()));
    }
    flush(&mut tokens, leaf_start, input.len());
    Ok(tokens)
}

// ── Grammar ─────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<Condition, ParseError> {
        let mut terms = vec![self.term()?];
        while matches!(self.peek(), Some(Token::Or(_))) {
            self.pos += 1;
            terms.push(self.term()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Condition::any(terms)
        })
    }

    fn term(&mut self) -> Result<Condition, ParseError> {
        let mut factors = vec![self.unary()?];
        while matches!(self.peek(), Some(Token::And(_))) {
            self.pos += 1;
            factors.push(self.unary()?);
        }
        Ok(if factors.len() == 1 {
            factors.remove(0)
        } else {
            Condition::all(factors)
        })
    }

    fn unary(&mut self) -> Result<Condition, ParseError> {
        match self.next() {
            Some(Token::Not(_)) => Ok(Condition::negate(self.unary()?)),
            Some(Token::Open(_)) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::Close(_)) => Ok(inner),
                    Some(token) => Err(token.unexpected()),
                    None => Err(ParseError::UnexpectedEnd),
                }
            }
            Some(Token::Leaf(text, _)) => parse_leaf(&text),
            Some(token) => Err(token.unexpected()),
            None => Err(ParseError::UnexpectedEnd),
        }
    }
}

// ── Leaves ──────────────────────────────────────────────────────────────

fn unquote(quoted: &str) -> String {
    quoted[1..quoted.len() - 1].to_string()
}

fn name(caps: &Captures<'_>, group: usize) -> Option<String> {
    caps.get(group).map(|m| unquote(m.as_str()))
}

fn number<T: FromStr>(text: &str, leaf: &str) -> Result<T, ParseError> {
    text.parse()
        .map_err(|_| ParseError::UnknownCondition(leaf.to_string()))
}

/// Split a trailing `<op> N` off a history or running phrase.
fn split_comparison(text: &str) -> Result<(&str, Option<Comparison>), ParseError> {
    let Some(caps) = COMPARISON.captures(text) else {
        return Ok((text, None));
    };
    let op = CmpOp::from_symbol(&caps[2])
        .ok_or_else(|| ParseError::UnknownCondition(text.to_string()))?;
    let value = number(&caps[3], text)?;
    let head = caps.get(1).map_or("", |m| m.as_str());
    Ok((head, Some(Comparison::new(op, value))))
}

fn optional_period(text: Option<regex::Match<'_>>) -> Result<Option<TimePeriod>, ParseError> {
    text.map(|m| parse_period(m.as_str())).transpose()
}

fn parse_leaf(leaf: &str) -> Result<Condition, ParseError> {
    let text = leaf.trim();
    match text.to_ascii_lowercase().as_str() {
        "true" | "always true" => return Ok(Condition::AlwaysTrue),
        "false" | "always false" => return Ok(Condition::AlwaysFalse),
        _ => {}
    }

    if let Some(caps) = DEPEND.captures(text) {
        let kind = caps
            .get(3)
            .and_then(|m| DependKind::from_verb(m.as_str()))
            .unwrap_or(DependKind::Success);
        return Ok(Condition::Depend {
            kind,
            depend_task: name(&caps, 2).unwrap_or_default(),
            task: name(&caps, 1),
        });
    }
    if let Some(caps) = DEPEND_MANY.captures(text) {
        let kind = caps
            .get(3)
            .and_then(|m| DependKind::from_verb(m.as_str()))
            .unwrap_or(DependKind::Success);
        let deps: Vec<Condition> = NAMES
            .find_iter(&caps[2])
            .map(|m| Condition::depend(kind, unquote(m.as_str())))
            .collect();
        if deps.is_empty() {
            return Err(ParseError::UnknownCondition(text.to_string()));
        }
        return Ok(if caps[1].eq_ignore_ascii_case("all") {
            Condition::all(deps)
        } else {
            Condition::any(deps)
        });
    }

    let (head, compare) = split_comparison(text)?;
    if let Some(caps) = HISTORY.captures(head) {
        let kind = HistoryKind::from_verb(&caps[2])
            .ok_or_else(|| ParseError::UnknownCondition(text.to_string()))?;
        return Ok(Condition::TaskHistory {
            kind,
            task: name(&caps, 1),
            period: optional_period(caps.get(3))?,
            compare,
        });
    }
    if let Some(caps) = RUNNING.captures(head) {
        return Ok(Condition::TaskRunning {
            task: name(&caps, 1),
            period: optional_period(caps.get(2))?,
            compare,
        });
    }

    if let Some(caps) = EXECUTABLE.captures(text) {
        let retries = match caps.get(3) {
            Some(m) => number(m.as_str(), text)?,
            None => 0,
        };
        return Ok(Condition::TaskExecutable {
            task: name(&caps, 1),
            period: parse_period(&caps[2])?,
            retries,
        });
    }
    if let Some(caps) = RUNNABLE.captures(text) {
        return Ok(Condition::TaskRunnable {
            task: name(&caps, 1),
            period: parse_period(&caps[2])?,
        });
    }
    if let Some(caps) = RETRY.captures(text) {
        return Ok(Condition::Retry {
            task: name(&caps, 1),
            n: number(&caps[2], text)?,
        });
    }
    if let Some(caps) = EVERY.captures(text) {
        let past = parse_duration(&caps[1])
            .ok_or_else(|| ParseError::InvalidDuration(caps[1].to_string()))?;
        let kind = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
            Some("success") => HistoryKind::Succeeded,
            Some("fail") => HistoryKind::Failed,
            Some("finish") => HistoryKind::Finished,
            _ => HistoryKind::Started,
        };
        return Ok(Condition::TaskHistory {
            kind,
            task: None,
            period: Some(TimeDelta::past(past).into()),
            compare: Some(Comparison::new(CmpOp::Eq, 0)),
        });
    }
    if let Some(caps) = ADVERB.captures(text) {
        let word = caps[1].to_ascii_lowercase();
        let scope = ADVERBS
            .iter()
            .find(|(_, adverb)| *adverb == word)
            .map(|(scope, _)| *scope)
            .ok_or_else(|| ParseError::UnknownCondition(text.to_string()))?;
        let anchored = anchored(scope, caps.get(2).map(|m| m.as_str()), text)?;
        return Ok(Condition::executable(anchored, 0));
    }
    if let Some(caps) = CRON.captures(text) {
        let period = TimePeriod::cron(&caps[1]).map_err(|e| period_error(text, e))?;
        return Ok(Condition::runnable(period));
    }
    if TIME_OF.is_match(text) {
        return Ok(Condition::IsPeriod(parse_period(text)?));
    }
    if let Some(caps) = TIME_IN.captures(text) {
        return Ok(Condition::IsPeriod(parse_period(&caps[1])?));
    }

    if let Some(caps) = CYCLES_WORDS.captures(text) {
        let op = if caps[1].eq_ignore_ascii_case("more") {
            CmpOp::Gt
        } else {
            CmpOp::Lt
        };
        return Ok(Condition::scheduler_cycles(op, number(&caps[2], text)?));
    }
    if let Some(caps) = CYCLES.captures(text) {
        let op = CmpOp::from_symbol(&caps[1])
            .ok_or_else(|| ParseError::UnknownCondition(text.to_string()))?;
        return Ok(Condition::scheduler_cycles(op, number(&caps[2], text)?));
    }
    if let Some(caps) = STARTED.captures(text) {
        return Ok(Condition::scheduler_started(parse_period(&caps[1])?));
    }

    if let Some(caps) = PARAM_EXISTS.captures(text) {
        return Ok(Condition::param_exists(unquote(&caps[1])));
    }
    if let Some(caps) = PARAM_IS.captures(text) {
        let raw = caps[2].trim();
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        return Ok(Condition::param_equals(unquote(&caps[1]), value));
    }
    if let Some(caps) = ENV.captures(text) {
        return Ok(Condition::is_env(unquote(&caps[1])));
    }

    Err(ParseError::UnknownCondition(text.to_string()))
}

// ── Periods ─────────────────────────────────────────────────────────────

fn period_error(input: &str, source: PeriodError) -> ParseError {
    ParseError::Period {
        input: input.to_string(),
        source,
    }
}

/// An anchored interval from an optional qualifier such as
/// `between 10:00 and 12:00`, `after Fri` or `on Mon`.
fn anchored(scope: Scope, qualifier: Option<&str>, input: &str) -> Result<TimePeriod, ParseError> {
    let Some(qualifier) = qualifier.map(str::trim).filter(|q| !q.is_empty()) else {
        return Ok(AnchoredInterval::full(scope).into());
    };
    let interval = if let Some(caps) = BETWEEN.captures(qualifier) {
        AnchoredInterval::between(scope, &caps[1], &caps[2])
    } else if let Some(caps) = QUALIFIER.captures(qualifier) {
        match caps[1].to_ascii_lowercase().as_str() {
            "after" => AnchoredInterval::after(scope, &caps[2]),
            "before" => AnchoredInterval::before(scope, &caps[2]),
            "starting" => AnchoredInterval::starting(scope, &caps[2]),
            _ => AnchoredInterval::at(scope, &caps[2]),
        }
    } else {
        return Err(ParseError::UnknownCondition(input.to_string()));
    };
    interval
        .map(TimePeriod::from)
        .map_err(|e| period_error(input, e))
}

fn parse_datetime(text: &str) -> Result<NaiveDateTime, ParseError> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M"))
        .or_else(|_| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d").map(|d| d.and_time(Default::default()))
        })
        .map_err(|_| ParseError::InvalidDatetime(text.to_string()))
}

fn duration(text: &str) -> Result<Duration, ParseError> {
    parse_duration(text).ok_or_else(|| ParseError::InvalidDuration(text.to_string()))
}

/// Parse a period expression: `always`, `never`, `today`, `this <scope>`,
/// `time of <scope> [qualifier]`, `past <dur> [future <dur>]`,
/// `future <dur>`, `span <dur> to <dur>`, `from <datetime> to <datetime>`
/// or `cron <expr>`.
pub fn parse_period(input: &str) -> Result<TimePeriod, ParseError> {
    let text = input.trim();
    match text.to_ascii_lowercase().as_str() {
        "always" => return Ok(TimePeriod::always()),
        "never" => return Ok(TimePeriod::never()),
        "today" => return Ok(AnchoredInterval::full(Scope::Day).into()),
        _ => {}
    }
    let scope = |word: &str| {
        Scope::from_name(word).ok_or_else(|| ParseError::UnknownCondition(input.to_string()))
    };

    if let Some(caps) = THIS.captures(text) {
        return Ok(AnchoredInterval::full(scope(&caps[1])?).into());
    }
    if let Some(caps) = TIME_OF.captures(text) {
        return anchored(scope(&caps[1])?, caps.get(2).map(|m| m.as_str()), input);
    }
    if let Some(caps) = CRON.captures(text) {
        return TimePeriod::cron(&caps[1]).map_err(|e| period_error(input, e));
    }
    if let Some(caps) = SPAN.captures(text) {
        let mut span = TimeSpanDelta::new(duration(&caps[1])?, duration(&caps[2])?);
        if let Some(reference) = caps.get(3) {
            span = span.with_reference(parse_datetime(reference.as_str())?);
        }
        return Ok(TimePeriod::SpanDelta(span));
    }
    if let Some(caps) = STATIC.captures(text) {
        let start = parse_datetime(&caps[1])?;
        let end = parse_datetime(&caps[2])?;
        return Ok(StaticInterval::new(start, end).into());
    }
    if let Some(caps) = DELTA.captures(text)
        && (caps.get(1).is_some() || caps.get(2).is_some())
    {
        let past = caps.get(1).map(|m| duration(m.as_str())).transpose()?;
        let future = caps.get(2).map(|m| duration(m.as_str())).transpose()?;
        let mut delta = TimeDelta::new(
            past.unwrap_or_else(Duration::zero),
            future.unwrap_or_else(Duration::zero),
        );
        if let Some(reference) = caps.get(3) {
            delta = delta.with_reference(parse_datetime(reference.as_str())?);
        }
        return Ok(delta.into());
    }

    Err(ParseError::UnknownCondition(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{TimeOfDay, TimeOfWeek};

    #[test]
    fn tokenizer_respects_quotes() {
        let tokens = tokenize("task 'a & b' has started | ~(true)").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Leaf("task 'a & b' has started".to_string(), 0),
                Token::Or(25),
                Token::Not(27),
                Token::Open(28),
                Token::Leaf("true".to_string(), 29),
                Token::Close(33),
            ]
        );
        assert!(matches!(
            tokenize("task 'a has started"),
            Err(ParseError::UnbalancedQuotes(_))
        ));
    }

    #[test]
    fn operators_bind_in_order() {
        let a = Condition::task_started("a");
        let b = Condition::task_failed("b");
        let c = Condition::is_env("prod");

        let cond = parse("task 'a' has started | task 'b' has failed & env 'prod'").unwrap();
        assert_eq!(cond, a.clone() | (b.clone() & c.clone()));

        let cond = parse("(task 'a' has started | task 'b' has failed) & ~env 'prod'").unwrap();
        assert_eq!(cond, (a.clone() | b) & !c);

        assert_eq!(parse("~~task 'a' has started").unwrap(), a);
        assert_eq!(parse("true & false").unwrap(), Condition::AlwaysFalse);
        assert_eq!(parse("always true").unwrap(), Condition::AlwaysTrue);
    }

    #[test]
    fn history_phrases() {
        assert_eq!(
            parse("task 'a' has succeeded").unwrap(),
            Condition::task_succeeded("a")
        );
        assert_eq!(
            parse("task \"it's\" has failed today >= 2").unwrap(),
            Condition::task_failed("it's")
                .in_period(TimeOfDay::full())
                .compare(CmpOp::Ge, 2)
        );
        assert_eq!(
            parse("has finished past 2 hours").unwrap(),
            Condition::TaskHistory {
                kind: HistoryKind::Finished,
                task: None,
                period: Some(TimePeriod::past(Duration::hours(2))),
                compare: None,
            }
        );
        assert_eq!(
            parse("task 'a' is running > 1").unwrap(),
            Condition::task_running("a").compare(CmpOp::Gt, 1)
        );
        assert_eq!(
            parse("every 10 minutes based fail").unwrap(),
            Condition::TaskHistory {
                kind: HistoryKind::Failed,
                task: None,
                period: Some(TimePeriod::past(Duration::minutes(10))),
                compare: Some(Comparison::new(CmpOp::Eq, 0)),
            }
        );
    }

    #[test]
    fn dependency_phrases() {
        assert_eq!(
            parse("after task 'a'").unwrap(),
            Condition::depend_success("a")
        );
        assert_eq!(
            parse("after task 'a' finished").unwrap(),
            Condition::depend_finish("a")
        );
        assert_eq!(
            parse("after all tasks 'a', 'b' failed").unwrap(),
            Condition::depend_fail("a") & Condition::depend_fail("b")
        );
        assert_eq!(
            parse("after any tasks 'a', 'b'").unwrap(),
            Condition::depend_success("a") | Condition::depend_success("b")
        );
    }

    #[test]
    fn schedule_phrases() {
        assert_eq!(
            parse("daily").unwrap(),
            Condition::executable(TimeOfDay::full(), 0)
        );
        assert_eq!(
            parse("daily between 10:00 and 12:00").unwrap(),
            Condition::executable(TimeOfDay::between("10:00", "12:00").unwrap(), 0)
        );
        assert_eq!(
            parse("weekly on monday").unwrap(),
            Condition::executable(TimeOfWeek::at("Mon").unwrap(), 0)
        );
        assert_eq!(
            parse("time of week after Fri 17:00").unwrap(),
            Condition::is_period(TimeOfWeek::after("Fri 17:00").unwrap())
        );
        assert_eq!(
            parse("cron */15 * * * *").unwrap(),
            Condition::runnable(TimePeriod::cron("*/15 * * * *").unwrap())
        );
        assert_eq!(
            parse("task 'a' is executable this week with 2 retries").unwrap(),
            Condition::executable(TimeOfWeek::full(), 2).for_task("a")
        );
    }

    #[test]
    fn scheduler_and_session_phrases() {
        assert_eq!(
            parse("scheduler has more than 3 cycles").unwrap(),
            Condition::scheduler_cycles(CmpOp::Gt, 3)
        );
        assert_eq!(
            parse("scheduler cycles <= 3").unwrap(),
            Condition::scheduler_cycles(CmpOp::Le, 3)
        );
        assert_eq!(
            parse("scheduler started past 1 hour").unwrap(),
            Condition::scheduler_started(TimePeriod::past(Duration::hours(1)))
        );
        assert_eq!(
            parse("param 'n' is 3").unwrap(),
            Condition::param_equals("n", 3)
        );
        assert_eq!(
            parse("param 'mode' is fast").unwrap(),
            Condition::param_equals("mode", "fast")
        );
        assert_eq!(parse("env 'prod'").unwrap(), Condition::is_env("prod"));
    }

    #[test]
    fn periods() {
        let day = |h| {
            NaiveDate::from_ymd_opt(2020, 1, 1)
                .unwrap()
                .and_hms_opt(h, 0, 0)
                .unwrap()
        };
        assert_eq!(
            parse_period("from 2020-01-01 10:00 to 2020-01-01 12:00:00").unwrap(),
            TimePeriod::between(day(10), day(12))
        );
        assert_eq!(
            parse_period("past 1 hour future 30 minutes").unwrap(),
            TimePeriod::from(TimeDelta::new(Duration::hours(1), Duration::minutes(30)))
        );
        assert_eq!(
            parse_period("future 1 day").unwrap(),
            TimePeriod::from(TimeDelta::future(Duration::days(1)))
        );
        assert_eq!(parse_period("this hour").unwrap(), crate::time::TimeOfHour::full());
    }

    #[test]
    fn reports_errors() {
        assert!(matches!(parse("task 'a' has started &"), Err(ParseError::UnexpectedEnd)));
        assert!(matches!(
            parse("(true"),
            Err(ParseError::UnexpectedEnd)
        ));
        assert!(matches!(
            parse("true )"),
            Err(ParseError::UnexpectedToken { position: 5, .. })
        ));
        assert!(matches!(
            parse("sometimes"),
            Err(ParseError::UnknownCondition(_))
        ));
        assert!(matches!(
            parse("every soon"),
            Err(ParseError::InvalidDuration(_))
        ));
        assert!(matches!(
            parse("daily between 25:00 and 26:00"),
            Err(ParseError::Period { .. })
        ));
        assert!(matches!(
            parse_period("from yesterday to 2020-01-01"),
            Err(ParseError::InvalidDatetime(_))
        ));
    }
}
