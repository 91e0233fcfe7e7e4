use crate::{datafile::GroupSegment, datafile_reader::DatafileReader, Context};

impl GroupSegment {
    /// Evaluate the segments expression against `context`. Segment keys are resolved through
    /// `reader`; a key that is missing or failed to parse never matches.
    pub(crate) fn is_matched(&self, reader: &DatafileReader, context: &Context) -> bool {
        match self {
            GroupSegment::Everyone => true,
            GroupSegment::Key(key) => match reader.get_segment(key) {
                Some(segment) => segment
                    .conditions
                    .is_matched(context, reader.regex_cache()),
                None => {
                    log::debug!(target: "featurevisor", segment_key = key.as_str(); "segment not found");
                    false
                }
            },
            GroupSegment::And(children) | GroupSegment::Every(children) => children
                .iter()
                .all(|child| child.is_matched(reader, context)),
            GroupSegment::Or(children) => children
                .iter()
                .any(|child| child.is_matched(reader, context)),
            GroupSegment::Not(children) => !children
                .iter()
                .all(|child| child.is_matched(reader, context)),
            GroupSegment::Stringified(stringified) => stringified
                .get()
                .is_some_and(|segments| segments.is_matched(reader, context)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        datafile::{DatafileContent, GroupSegment},
        datafile_reader::DatafileReader,
        regex_cache::RegexCache,
        Context,
    };

    fn reader() -> DatafileReader {
        let content: DatafileContent = serde_json::from_str(
            r#"{
                "schemaVersion": "2",
                "revision": "1",
                "segments": {
                    "mobile": {
                        "conditions": [{ "attribute": "device", "operator": "equals", "value": "mobile" }]
                    },
                    "germany": {
                        "conditions": [{ "attribute": "country", "operator": "equals", "value": "de" }]
                    },
                    "switzerland": {
                        "conditions": "[{\"attribute\":\"country\",\"operator\":\"equals\",\"value\":\"ch\"}]"
                    },
                    "broken": {
                        "conditions": 42
                    }
                },
                "features": {}
            }"#,
        )
        .unwrap();
        DatafileReader::new(content, Arc::new(RegexCache::new()))
    }

    fn segments(json: &str) -> GroupSegment {
        serde_json::from_str(json).unwrap()
    }

    fn context(device: &str, country: &str) -> Context {
        [
            ("device".to_owned(), device.into()),
            ("country".to_owned(), country.into()),
        ]
        .into()
    }

    #[test]
    fn resolves_segment_keys() {
        let reader = reader();
        assert!(segments(r#""mobile""#).is_matched(&reader, &context("mobile", "nl")));
        assert!(!segments(r#""mobile""#).is_matched(&reader, &context("desktop", "nl")));
        assert!(segments(r#""switzerland""#).is_matched(&reader, &context("desktop", "ch")));
    }

    #[test]
    fn unknown_and_broken_segments_never_match() {
        let reader = reader();
        assert!(!segments(r#""unknown""#).is_matched(&reader, &context("mobile", "de")));
        assert!(!segments(r#""broken""#).is_matched(&reader, &context("mobile", "de")));
        assert!(segments(r#"{"not": ["unknown"]}"#).is_matched(&reader, &context("mobile", "de")));
    }

    #[test]
    fn combinators() {
        let reader = reader();
        let expr = segments(r#"{"and":["mobile",{"or":["germany","switzerland"]}]}"#);
        assert!(expr.is_matched(&reader, &context("mobile", "de")));
        assert!(expr.is_matched(&reader, &context("mobile", "ch")));
        assert!(!expr.is_matched(&reader, &context("mobile", "nl")));
        assert!(!expr.is_matched(&reader, &context("desktop", "de")));

        assert!(segments(r#"["mobile", "germany"]"#).is_matched(&reader, &context("mobile", "de")));
        assert!(segments(r#""*""#).is_matched(&reader, &Context::new()));
    }

    #[test]
    fn stringified_expression() {
        let reader = reader();
        let expr = segments(r#""{\"and\":[\"mobile\",{\"or\":[\"germany\",\"switzerland\"]}]}""#);
        assert!(expr.is_matched(&reader, &context("mobile", "ch")));
        assert!(!expr.is_matched(&reader, &context("desktop", "ch")));
        assert!(!segments(r#""[broken""#).is_matched(&reader, &context("mobile", "ch")));
    }

    #[test]
    fn de_morgan() {
        let reader = reader();
        let not_and = segments(r#"{"not":[{"and":["mobile","germany"]}]}"#);
        let or_not = segments(r#"{"or":[{"not":["mobile"]},{"not":["germany"]}]}"#);
        let not_or = segments(r#"{"not":[{"or":["mobile","germany"]}]}"#);
        let and_not = segments(r#"{"and":[{"not":["mobile"]},{"not":["germany"]}]}"#);

        for device in ["mobile", "desktop"] {
            for country in ["de", "nl"] {
                let ctx = context(device, country);
                assert_eq!(
                    not_and.is_matched(&reader, &ctx),
                    or_not.is_matched(&reader, &ctx),
                    "{device}/{country}"
                );
                assert_eq!(
                    not_or.is_matched(&reader, &ctx),
                    and_not.is_matched(&reader, &ctx),
                    "{device}/{country}"
                );
            }
        }
    }
}
