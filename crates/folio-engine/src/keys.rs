//! Index key extraction.
//!
//! The engine stores opaque document bytes. Secondary index keys come from
//! the value layer through a [`KeyExtractor`], which evaluates an index
//! expression against a document.

use folio_common::{FolioResult, IndexKey};

/// Turns an index expression and a document into the keys it indexes.
pub trait KeyExtractor: Send + Sync {
    /// Returns every key `expression` yields for `document`. A multi-key
    /// expression may return several; none means the document indexes as
    /// `Null`.
    ///
    /// # Errors
    ///
    /// Returns an error when the document cannot be decoded or the
    /// expression is invalid.
    fn extract(&self, expression: &str, document: &[u8]) -> FolioResult<Vec<IndexKey>>;
}

/// Runs `extractor` and normalizes its result: an empty result becomes a
/// single `Null` key and duplicates are removed.
pub(crate) fn extract_keys(
    extractor: &dyn KeyExtractor,
    expression: &str,
    document: &[u8],
) -> FolioResult<Vec<IndexKey>> {
    let mut keys = extractor.extract(expression, document)?;
    if keys.is_empty() {
        return Ok(vec![IndexKey::Null]);
    }
    keys.sort();
    keys.dedup();
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<IndexKey>);

    impl KeyExtractor for Fixed {
        fn extract(&self, _expression: &str, _document: &[u8]) -> FolioResult<Vec<IndexKey>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_empty_result_is_null() {
        let keys = extract_keys(&Fixed(Vec::new()), "$.tag", b"{}").unwrap();
        assert_eq!(keys, vec![IndexKey::Null]);
    }

    #[test]
    fn test_duplicates_removed() {
        let extractor = Fixed(vec![
            IndexKey::from("b"),
            IndexKey::from("a"),
            IndexKey::from("b"),
        ]);
        let keys = extract_keys(&extractor, "$.tags[*]", b"{}").unwrap();
        assert_eq!(keys, vec![IndexKey::from("a"), IndexKey::from("b")]);
    }
}
