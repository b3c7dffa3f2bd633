//! Content negotiation for SPARQL results
//!
//! Each result kind has a closed list of media types it can be written in
//! and a default used when the client expresses no usable preference.

use crate::sparql::ResultKind;
use mime::Mime;
use std::fmt;

/// Response serialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// Plain JSON array of solution objects
    Json,
    /// SPARQL 1.1 Query Results XML
    SparqlResultsXml,
    /// SPARQL 1.1 Query Results JSON
    SparqlResultsJson,
    /// TriG
    TriG,
    /// N-Quads
    NQuads,
}

impl MediaType {
    /// Exact `Content-Type` value
    pub const fn as_str(self) -> &'static str {
        match self {
            MediaType::Json => "application/json",
            MediaType::SparqlResultsXml => "application/sparql-results+xml",
            MediaType::SparqlResultsJson => "application/sparql-results+json",
            MediaType::TriG => "application/trig",
            MediaType::NQuads => "application/n-quads",
        }
    }

    fn type_and_subtype(self) -> (&'static str, &'static str) {
        self.as_str().split_once('/').unwrap_or((self.as_str(), ""))
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media types for bindings results, in preference order
pub const BINDINGS_MEDIA_TYPES: [MediaType; 3] = [
    MediaType::Json,
    MediaType::SparqlResultsXml,
    MediaType::SparqlResultsJson,
];

/// Default for bindings results
pub const BINDINGS_DEFAULT: MediaType = MediaType::SparqlResultsJson;

/// Media types for quads results, in preference order
pub const QUADS_MEDIA_TYPES: [MediaType; 2] = [MediaType::TriG, MediaType::NQuads];

/// Default for quads results
pub const QUADS_DEFAULT: MediaType = MediaType::NQuads;

/// What the client asked for and what the result can be written as
#[derive(Debug, Clone, Copy)]
pub struct NegotiationRequest<'a> {
    /// Raw `Accept` header, if any
    pub accept_header: Option<&'a str>,
    /// Shape of the result to serialize
    pub result_kind: ResultKind,
}

impl NegotiationRequest<'_> {
    /// Pick the media type for the response
    pub fn media_type(&self) -> MediaType {
        match self.result_kind {
            ResultKind::Bindings => negotiate(self.accept_header, &BINDINGS_MEDIA_TYPES, BINDINGS_DEFAULT),
            ResultKind::Quads => negotiate(self.accept_header, &QUADS_MEDIA_TYPES, QUADS_DEFAULT),
        }
    }
}

#[derive(Debug)]
struct MediaRange {
    type_: String,
    subtype: String,
    quality: f32,
}

impl MediaRange {
    /// 2 for an exact match, 1 for `type/*`, 0 for `*/*`
    fn specificity(&self, candidate: MediaType) -> Option<u8> {
        let (type_, subtype) = candidate.type_and_subtype();
        if self.type_ == "*" && self.subtype == "*" {
            Some(0)
        } else if self.type_ == type_ && self.subtype == "*" {
            Some(1)
        } else if self.type_ == type_ && self.subtype == subtype {
            Some(2)
        } else {
            None
        }
    }
}

fn parse_accept(header: &str) -> Vec<MediaRange> {
    header
        .split(',')
        .filter_map(|entry| {
            let mime: Mime = entry.trim().parse().ok()?;
            let quality = mime
                .get_param("q")
                .and_then(|q| q.as_str().parse::<f32>().ok())
                .unwrap_or(1.0)
                .clamp(0.0, 1.0);
            // `subtype()` drops the structured syntax suffix (`+json`, `+xml`)
            let (type_, subtype) = mime.essence_str().split_once('/')?;
            Some(MediaRange {
                type_: type_.to_ascii_lowercase(),
                subtype: subtype.to_ascii_lowercase(),
                quality,
            })
        })
        .collect()
}

/// Choose the best of `candidates` for an `Accept` header.
///
/// Candidates are ranked by quality, then by how specifically they were
/// matched; a default matched only through a wildcard beats other wildcard
/// matches, and remaining ties go to the earlier candidate. Without a header,
/// or when nothing acceptable matches, `default` is returned.
pub fn negotiate(accept_header: Option<&str>, candidates: &[MediaType], default: MediaType) -> MediaType {
    let Some(header) = accept_header else {
        return default;
    };
    let ranges = parse_accept(header);

    let mut best: Option<(f32, u8, bool, MediaType)> = None;
    for &candidate in candidates {
        // The most specific range that names the candidate decides its quality
        let Some((quality, specificity)) = ranges
            .iter()
            .filter_map(|range| range.specificity(candidate).map(|s| (range.quality, s)))
            .max_by_key(|&(_, specificity)| specificity)
        else {
            continue;
        };
        if quality <= 0.0 {
            continue;
        }

        let wildcard_default = specificity < 2 && candidate == default;
        let better = match best {
            None => true,
            Some((best_quality, best_specificity, best_default, _)) => {
                quality > best_quality
                    || (quality == best_quality
                        && (specificity > best_specificity
                            || (specificity == best_specificity && wildcard_default && !best_default)))
            }
        };
        if better {
            best = Some((quality, specificity, wildcard_default, candidate));
        }
    }

    best.map_or(default, |(.., media_type)| media_type)
}
