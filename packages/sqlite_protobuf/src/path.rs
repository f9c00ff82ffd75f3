use crate::error::Error;

/// One component of a protopath. `$.phones[0].number` parses to the root
/// sentinel followed by `IndexedField("phones", 0)` and `Field("number")`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Root,
    Field(String),
    IndexedField(String, i64),
}

/// A parsed protopath: `$` followed by `.field` steps, each optionally
/// carrying a signed index into a repeated field. Negative indices count
/// from the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    steps: Vec<Step>,
}

impl Path {
    /// Parses the whole input or fails. A bare `$` is the root path.
    pub fn parse(input: &str) -> Result<Path, Error> {
        let mut rest = input.strip_prefix('$').ok_or(Error::InvalidPath)?;
        let mut steps = vec![Step::Root];

        while !rest.is_empty() {
            rest = rest.strip_prefix('.').ok_or(Error::InvalidPath)?;

            let end = rest.find(['.', '[']).unwrap_or(rest.len());
            if end == 0 {
                return Err(Error::InvalidPath);
            }
            let name = &rest[..end];
            rest = &rest[end..];

            if let Some(after) = rest.strip_prefix('[') {
                let close = after.find(']').ok_or(Error::InvalidPath)?;
                let index = parse_index(&after[..close])?;
                rest = &after[close + 1..];
                steps.push(Step::IndexedField(name.to_owned(), index));
            } else {
                steps.push(Step::Field(name.to_owned()));
            }
        }

        Ok(Path { steps })
    }

    /// All steps, starting with the root sentinel.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

/// Indices match `-?[0-9]+` exactly; no whitespace, no `+` sign.
fn parse_index(text: &str) -> Result<i64, Error> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidPath);
    }

    text.parse().map_err(|_| Error::InvalidPath)
}
