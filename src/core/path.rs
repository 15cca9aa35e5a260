// Field paths such as `header.items[3].len`

use super::error::{Result, UsageError};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seg {
    Field(String),
    Index(usize),
}

impl fmt::Display for Seg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seg::Field(name) => f.write_str(name),
            Seg::Index(i) => write!(f, "[{}]", i),
        }
    }
}

/// Parses a dotted path with bracketed indices. The empty path is the root.
pub fn parse_path(path: &str) -> Result<Vec<Seg>> {
    let invalid = || UsageError::InvalidPath(path.to_string());
    let mut segs = Vec::new();
    let mut rest = path.trim();

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('[') {
            let end = after.find(']').ok_or_else(invalid)?;
            let index = after[..end].trim().parse().map_err(|_| invalid())?;
            segs.push(Seg::Index(index));
            rest = &after[end + 1..];
        } else {
            let body = if segs.is_empty() {
                rest
            } else {
                rest.strip_prefix('.').ok_or_else(invalid)?
            };
            let end = body.find(['.', '[']).unwrap_or(body.len());
            let name = &body[..end];
            if name.is_empty() {
                return Err(invalid().into());
            }
            segs.push(Seg::Field(name.to_string()));
            rest = &body[end..];
        }
    }
    Ok(segs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_path() {
        assert_eq!(
            parse_path("header.items[3].len").unwrap(),
            vec![
                Seg::Field("header".into()),
                Seg::Field("items".into()),
                Seg::Index(3),
                Seg::Field("len".into()),
            ]
        );
        assert_eq!(parse_path("[0][1]").unwrap(), vec![Seg::Index(0), Seg::Index(1)]);
        assert!(parse_path("").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_paths() {
        assert!(parse_path("a..b").is_err());
        assert!(parse_path("a[x]").is_err());
        assert!(parse_path("a[1").is_err());
    }
}
