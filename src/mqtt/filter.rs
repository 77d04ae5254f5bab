use std::str::FromStr;

/// A parsed MQTT topic filter, e.g. `sensors/+/temperature` or `sensors/#`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    tokens: Vec<FilterToken>,
    leaf_kind: LeafKind,
}

impl FromStr for Filter {
    type Err = FilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(FilterParseError::EmptyFilter);
        }

        let mut tokens = Vec::new();
        let mut leaf_kind = LeafKind::Exact;

        for token in s.split('/') {
            // we have another level after a `#`
            if leaf_kind == LeafKind::Any {
                return Err(FilterParseError::InvalidWildcard);
            }

            match token {
                "+" => tokens.push(FilterToken::WildPlus),
                "#" => leaf_kind = LeafKind::Any,
                _ => {
                    if let Some((idx, ch)) = token
                        .char_indices()
                        .find(|it| matches!(it.1, '#' | '+' | '\0'))
                    {
                        return Err(FilterParseError::InvalidToken {
                            token: token.to_owned(),
                            pos: idx,
                            ch,
                        });
                    }

                    tokens.push(FilterToken::Literal(token.to_owned().into_boxed_str()));
                }
            }
        }

        Ok(Self { tokens, leaf_kind })
    }
}

impl Filter {
    /// Returns `true` if `topic` is matched by this filter.
    ///
    /// Topics starting with `$` are only matched by filters that start with the same literal level
    /// [MQTT-4.7.2-1].
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic.starts_with('$') && !matches!(self.tokens.first(), Some(FilterToken::Literal(_))) {
            return false;
        }

        let mut levels = topic.split('/');

        for token in &self.tokens {
            let Some(level) = levels.next() else {
                return false;
            };

            if !token.matches(level) {
                return false;
            }
        }

        // `sport/#` also matches `sport` itself [MQTT-4.7.1-2].
        self.leaf_kind.is_any() || levels.next().is_none()
    }

    /// Returns `true` if some topic is matched by both `self` and `other`.
    pub fn overlaps(&self, other: &Filter) -> bool {
        if (self.is_system() && other.starts_with_wildcard())
            || (other.is_system() && self.starts_with_wildcard())
        {
            return false;
        }

        let mut tokens = self.tokens.iter();
        let mut other_tokens = other.tokens.iter();

        loop {
            match (tokens.next(), other_tokens.next()) {
                (Some(FilterToken::Literal(a)), Some(FilterToken::Literal(b))) if a != b => {
                    return false
                }
                (Some(_), Some(_)) => (),
                (None, None) => return true,
                // The shorter filter needs a `#` to reach the levels the longer one requires.
                (None, Some(_)) => return self.leaf_kind.is_any(),
                (Some(_), None) => return other.leaf_kind.is_any(),
            }
        }
    }

    /// Returns `true` if every topic matched by `other` is also matched by `self`.
    pub fn covers(&self, other: &Filter) -> bool {
        if other.is_system() && self.starts_with_wildcard() {
            return false;
        }

        let mut tokens = self.tokens.iter();
        let mut other_tokens = other.tokens.iter();

        loop {
            match (tokens.next(), other_tokens.next()) {
                (Some(FilterToken::WildPlus), Some(_)) => (),
                (Some(FilterToken::Literal(a)), Some(FilterToken::Literal(b))) if a == b => (),
                (Some(_), Some(_)) => return false,
                (None, None) => return self.leaf_kind.is_any() || !other.leaf_kind.is_any(),
                (None, Some(_)) => return self.leaf_kind.is_any(),
                // `other` matches topics with fewer levels than `self` requires.
                (Some(_), None) => return false,
            }
        }
    }

    /// Starts with a `$` level, e.g. `$SYS/#`.
    fn is_system(&self) -> bool {
        matches!(self.tokens.first(), Some(FilterToken::Literal(lit)) if lit.starts_with('$'))
    }

    fn starts_with_wildcard(&self) -> bool {
        !matches!(self.tokens.first(), Some(FilterToken::Literal(_)))
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum FilterParseError {
    /// Filter must not be empty.
    #[error("filter must not be empty")]
    EmptyFilter,

    /// `token` contains an invalid character (`ch`) at `pos`.
    #[error("{token} contains an invalid character starting at {pos} (`{ch}`)")]
    InvalidToken { token: String, pos: usize, ch: char },

    /// Found a `#` wildcard and it wasn't the end of the filter.
    #[error("filter contains a `#` wildcard that isn't trailing")]
    InvalidWildcard,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum FilterToken {
    /// `text`
    Literal(Box<str>),
    /// A `+` (any on this level) wildcard.
    WildPlus,
}

impl FilterToken {
    fn matches(&self, level: &str) -> bool {
        match self {
            FilterToken::Literal(lit) => &**lit == level,
            FilterToken::WildPlus => true,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LeafKind {
    /// No wildcard.
    Exact,
    /// A `#` wildcard found.
    Any,
}

impl LeafKind {
    fn is_any(self) -> bool {
        matches!(self, Self::Any)
    }
}

#[cfg(test)]
mod tests {
    use super::{Filter, FilterParseError};

    fn filter(s: &str) -> Filter {
        s.parse().unwrap()
    }

    #[test]
    fn parse_errors() {
        assert_eq!("".parse::<Filter>(), Err(FilterParseError::EmptyFilter));
        assert_eq!(
            "foo/#/bar".parse::<Filter>(),
            Err(FilterParseError::InvalidWildcard)
        );
        assert_eq!(
            "foo/ba+r".parse::<Filter>(),
            Err(FilterParseError::InvalidToken {
                token: "ba+r".to_string(),
                pos: 2,
                ch: '+',
            })
        );
    }

    #[test]
    fn exact() {
        let f = filter("sensors/1");
        assert!(f.matches_topic("sensors/1"));
        assert!(!f.matches_topic("sensors/2"));
        assert!(!f.matches_topic("sensors"));
        assert!(!f.matches_topic("sensors/1/temp"));
    }

    #[test]
    fn wildcards() {
        let plus = filter("sensors/+/temp");
        assert!(plus.matches_topic("sensors/1/temp"));
        assert!(plus.matches_topic("sensors//temp"));
        assert!(!plus.matches_topic("sensors/1/humidity"));
        assert!(!plus.matches_topic("sensors/1/temp/raw"));

        let hash = filter("sensors/#");
        assert!(hash.matches_topic("sensors"));
        assert!(hash.matches_topic("sensors/1"));
        assert!(hash.matches_topic("sensors/1/temp"));
        assert!(!hash.matches_topic("actuators/1"));

        assert!(filter("#").matches_topic("anything/at/all"));
    }

    #[test]
    fn system_topics() {
        assert!(!filter("#").matches_topic("$SYS/uptime"));
        assert!(!filter("+/uptime").matches_topic("$SYS/uptime"));
        assert!(filter("$SYS/#").matches_topic("$SYS/uptime"));
    }

    #[test]
    fn overlaps() {
        let secret = filter("secret/#");

        assert!(secret.overlaps(&filter("#")));
        assert!(secret.overlaps(&filter("+/x")));
        assert!(secret.overlaps(&filter("+")));
        assert!(secret.overlaps(&filter("secret")));
        assert!(secret.overlaps(&filter("secret/a/+/b")));
        assert!(!secret.overlaps(&filter("public/#")));
        assert!(!secret.overlaps(&filter("public/+/x")));

        assert!(filter("a/+/c").overlaps(&filter("a/b/+")));
        assert!(!filter("a/+/c").overlaps(&filter("a/b/d")));
        assert!(!filter("a/+").overlaps(&filter("a/+/c")));
        assert!(filter("a/+/#").overlaps(&filter("a/b/c/d")));

        assert!(!filter("$SYS/#").overlaps(&filter("#")));
        assert!(!filter("+/uptime").overlaps(&filter("$SYS/uptime")));
        assert!(filter("$SYS/+").overlaps(&filter("$SYS/#")));
    }

    #[test]
    fn covers() {
        assert!(filter("#").covers(&filter("a/b")));
        assert!(filter("#").covers(&filter("+/#")));
        assert!(filter("a/#").covers(&filter("a")));
        assert!(filter("a/#").covers(&filter("a/+/c")));
        assert!(filter("a/+").covers(&filter("a/b")));
        assert!(filter("a/+").covers(&filter("a/+")));

        assert!(!filter("a/+").covers(&filter("a/#")));
        assert!(!filter("a/+").covers(&filter("a")));
        assert!(!filter("a/b").covers(&filter("a/+")));
        assert!(!filter("a/b").covers(&filter("a/b/c")));
        assert!(!filter("secret/#").covers(&filter("#")));

        assert!(!filter("#").covers(&filter("$SYS/uptime")));
        assert!(filter("$SYS/#").covers(&filter("$SYS/uptime")));
    }
}
