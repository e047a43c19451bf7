//! Statement splitting
//!
//! A batch is cut at top-level `;`. Quoted strings, quoted identifiers and
//! comments are skipped, so a `;` inside them never splits. Neither does a
//! `;` inside the `BEGIN ... END` body of `CREATE TRIGGER`. Positional `?`
//! parameters are handed to the statement they appear in, in order.

use crate::errors::{LixError, LixResult};
use crate::storage::SqlValue;

/// One executable statement with its own parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

#[derive(Debug, Default)]
struct Segment {
    sql: String,
    positional: usize,
    numbered: bool,
    has_code: bool,
    /// Leading keywords, uppercased; enough to recognize `CREATE TRIGGER`
    leading: Vec<String>,
    /// Open `BEGIN`/`CASE` blocks of a trigger body
    depth: usize,
}

impl Segment {
    fn is_trigger(&self) -> bool {
        self.leading.first().is_some_and(|w| w == "CREATE")
            && self.leading.iter().any(|w| w == "TRIGGER")
    }

    fn word(&mut self, word: &str) {
        let upper = word.to_ascii_uppercase();
        if !self.is_trigger() {
            if self.leading.len() < 4 {
                self.leading.push(upper);
            }
            return;
        }
        match upper.as_str() {
            "BEGIN" | "CASE" => self.depth += 1,
            "END" => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
    }
}

/// Split `sql` into statements and slice `params` between them
///
/// Segments holding only whitespace or comments are dropped. Numbered
/// placeholders (`?1`, `$1`, `:name`, `@name`) are only accepted in a
/// single-statement batch, which then receives every parameter.
pub fn split_statements(sql: &str, params: &[SqlValue]) -> LixResult<Vec<SqlStatement>> {
    let segments = scan(sql)?;

    if segments.len() == 1 && segments[0].numbered {
        if segments[0].positional > 0 {
            return Err(LixError::InvalidInput(
                "mixing '?' and numbered placeholders is not supported".to_string(),
            ));
        }
        return Ok(vec![SqlStatement {
            sql: segments[0].sql.clone(),
            params: params.to_vec(),
        }]);
    }
    if segments.iter().any(|s| s.numbered) {
        return Err(LixError::InvalidInput(
            "numbered placeholders are not supported in multi-statement batches".to_string(),
        ));
    }

    let expected: usize = segments.iter().map(|s| s.positional).sum();
    if expected != params.len() {
        return Err(LixError::InvalidInput(format!(
            "batch expects {} parameter(s), got {}",
            expected,
            params.len()
        )));
    }

    let mut offset = 0;
    Ok(segments
        .into_iter()
        .map(|segment| {
            let end = offset + segment.positional;
            let statement = SqlStatement {
                sql: segment.sql,
                params: params[offset..end].to_vec(),
            };
            offset = end;
            statement
        })
        .collect())
}

fn scan(sql: &str) -> LixResult<Vec<Segment>> {
    let chars: Vec<char> = sql.chars().collect();
    let mut segments = Vec::new();
    let mut current = Segment::default();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' | '[' => {
                let close = if c == '[' { ']' } else { c };
                let start = i;
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(LixError::SqlParse(format!(
                                "unterminated quote starting at offset {}",
                                start
                            )))
                        }
                        // A doubled quote is an escaped quote.
                        Some(&ch) if ch == close && close != ']' && chars.get(i + 1) == Some(&close) => {
                            i += 2;
                        }
                        Some(&ch) if ch == close => {
                            i += 1;
                            break;
                        }
                        Some(_) => i += 1,
                    }
                }
                current.sql.extend(&chars[start..i]);
                current.has_code = true;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                let start = i;
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                current.sql.extend(&chars[start..i]);
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let start = i;
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
                current.sql.extend(&chars[start..i]);
            }
            ';' if current.depth > 0 => {
                current.sql.push(c);
                i += 1;
            }
            ';' => {
                finish(&mut segments, &mut current);
                i += 1;
            }
            '?' => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if i - start > 1 {
                    current.numbered = true;
                } else {
                    current.positional += 1;
                }
                current.sql.extend(&chars[start..i]);
                current.has_code = true;
            }
            '$' | ':' | '@' if is_named_placeholder(&chars, i) => {
                current.numbered = true;
                current.sql.push(c);
                current.has_code = true;
                i += 1;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                current.word(&word);
                current.sql.push_str(&word);
                current.has_code = true;
            }
            _ => {
                if !c.is_whitespace() {
                    current.has_code = true;
                }
                current.sql.push(c);
                i += 1;
            }
        }
    }
    finish(&mut segments, &mut current);
    Ok(segments)
}

fn is_named_placeholder(chars: &[char], i: usize) -> bool {
    let starts_name = chars
        .get(i + 1)
        .is_some_and(|n| n.is_ascii_alphanumeric() || *n == '_');
    let follows_word = i > 0 && {
        let p = chars[i - 1];
        p.is_ascii_alphanumeric() || p == '_' || p == ':'
    };
    starts_name && !follows_word
}

fn finish(segments: &mut Vec<Segment>, current: &mut Segment) {
    let mut segment = std::mem::take(current);
    if segment.has_code {
        segment.sql = segment.sql.trim().to_string();
        segments.push(segment);
    }
}
