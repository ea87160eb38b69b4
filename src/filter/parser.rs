/*!
Parser for the one-line filter DSL.

A filter string is a sequence of whitespace-separated clauses joined by
the literal `and`:

```text
proj ris and coll rrc06 and type updates and prefix more 10.0.0.0/8
```

Each clause is a term (with aliases, e.g. `proj`/`project`), an optional
prefix-match extension after `prefix` (`any`, `more`, `less`, `exact`,
defaulting to `more`), and a value which may span several tokens when
double-quoted (`path "^174 2914"`). Parsing the same string twice
yields the same filter set.
*/
use crate::error::BgpStreamError;
use crate::filter::{FilterKind, FilterStore};
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Term,
    PrefixExt,
    Value,
    QuotedValue,
    EndValue,
}

struct FilterItem {
    kind: FilterKind,
    value: String,
}

fn parse_term(token: &str) -> Option<(FilterKind, ParseState)> {
    let (kind, state) = match token {
        "project" | "proj" => (FilterKind::Project, ParseState::Value),
        "collector" | "coll" => (FilterKind::Collector, ParseState::Value),
        "type" => (FilterKind::RecordType, ParseState::Value),
        "peer" => (FilterKind::PeerAsn, ParseState::Value),
        "prefix" | "pref" => (FilterKind::PrefixMore, ParseState::PrefixExt),
        "community" | "comm" => (FilterKind::Community, ParseState::Value),
        "aspath" | "path" => (FilterKind::AsPath, ParseState::Value),
        "extcommunity" | "extc" => (FilterKind::ExtendedCommunity, ParseState::Value),
        "ipversion" | "ipv" => (FilterKind::IpVersion, ParseState::Value),
        "elemtype" => (FilterKind::ElemType, ParseState::Value),
        _ => return None,
    };
    Some((kind, state))
}

fn parse_prefix_ext(token: &str) -> Option<FilterKind> {
    match token {
        "any" => Some(FilterKind::PrefixAny),
        "more" => Some(FilterKind::PrefixMore),
        "less" => Some(FilterKind::PrefixLess),
        "exact" => Some(FilterKind::PrefixExact),
        _ => None,
    }
}

/// Parses a filter string and applies every clause to the store.
///
/// An unknown term, a bad conjunction or an unparseable value aborts
/// with a configuration error; clauses before the failure have already
/// been applied (appending is the store's only mutation, so re-running
/// a corrected string is safe).
pub fn parse_filter_string(store: &mut FilterStore, input: &str) -> Result<(), BgpStreamError> {
    debug!("parsing filter string '{}'", input);
    let mut state = ParseState::Term;
    let mut item = FilterItem {
        kind: FilterKind::Project,
        value: String::new(),
    };

    for token in input.split_whitespace() {
        match state {
            ParseState::Term => {
                let (kind, next) = parse_term(token).ok_or_else(|| {
                    BgpStreamError::ConfigError(format!("expected a filter term, got '{token}'"))
                })?;
                item.kind = kind;
                state = next;
            }
            ParseState::PrefixExt => {
                if let Some(kind) = parse_prefix_ext(token) {
                    item.kind = kind;
                    state = ParseState::Value;
                } else {
                    // not an extension, the token is already the value
                    state = take_value(&mut item, token, store)?;
                }
            }
            ParseState::Value => {
                state = take_value(&mut item, token, store)?;
            }
            ParseState::QuotedValue => {
                state = append_quoted(&mut item, token, store)?;
            }
            ParseState::EndValue => {
                if token != "and" {
                    return Err(BgpStreamError::ConfigError(format!(
                        "bad conjunction in filter string: '{token}'"
                    )));
                }
                item.value.clear();
                state = ParseState::Term;
            }
        }
    }

    match state {
        ParseState::EndValue => Ok(()),
        ParseState::Term if input.trim().is_empty() => Ok(()),
        _ => Err(BgpStreamError::ConfigError(
            "filter string ended mid-clause".to_string(),
        )),
    }
}

fn take_value(
    item: &mut FilterItem,
    token: &str,
    store: &mut FilterStore,
) -> Result<ParseState, BgpStreamError> {
    if let Some(rest) = token.strip_prefix('"') {
        return append_quoted(item, rest, store);
    }
    item.value = token.to_string();
    store.add(item.kind, &item.value)?;
    Ok(ParseState::EndValue)
}

fn append_quoted(
    item: &mut FilterItem,
    token: &str,
    store: &mut FilterStore,
) -> Result<ParseState, BgpStreamError> {
    let (part, closed) = match token.split_once('"') {
        Some((before, _)) => (before, true),
        None => (token, false),
    };
    if !part.is_empty() {
        if !item.value.is_empty() {
            item.value.push(' ');
        }
        item.value.push_str(part);
    }
    if closed {
        store.add(item.kind, &item.value)?;
        Ok(ParseState::EndValue)
    } else {
        Ok(ParseState::QuotedValue)
    }
}
