//! System prompts and user-message builders for the LLM calls.
//!
//! Each prompt asks for a single JSON object so replies can be parsed with
//! [`crate::llm::extract`].

use chrono::NaiveDate;

use crate::store::IndexHit;

/// Rewrites a query into collection-level phrasing and classifies it.
///
/// Reply: `{"query": string, "is_specific": bool}`.
pub const FRAMING: &str = r#"You help search a catalog of satellite imagery.
Rewrite the user's request so it can be matched against the titles and
descriptions of STAC collections. Remove item-level details such as dates,
cloud cover and other filters; keep only what identifies the kind of data.

Examples:
- "cloudless imagery from sentinel over Paris" -> "sentinel imagery over Paris"
- "There was a wildfire in Florida in 2023. I want images" -> "wildfire and burn scar imagery over Florida"
- "I want to check how much forest reduced in Africa" -> "land cover land use data in Africa"

Set is_specific to true when the request names a kind of collection: a data
product (land cover, land use, forest cover change, burn scar, elevation) or a
platform or sensor (sentinel, landsat, NAIP). Set it to false when any imagery
of the place would do.

- "imagery of Paris" -> false
- "sentinel-2 imagery of Paris" -> true
- "wildfire in Florida in 2023" -> true
- "show me relatively cloudless images of Colorado" -> false (cloud cover is an item filter)

Respond with a JSON object: {"query": "<rewritten query>", "is_specific": <true|false>}"#;

/// Orders candidate collections by relevance and explains each.
///
/// Reply: `{"results": [{"collection_id": string, "explanation": string}]}`.
pub const RERANK: &str = r#"You rank geospatial data collections by how relevant they are to a user's request.
For each relevant collection give one short sentence explaining why it fits.
List the most relevant collection first and leave out collections that do not
fit the request at all. Only use collection ids from the list you are given.

Respond with a JSON object:
{"results": [{"collection_id": "<id>", "explanation": "<one sentence>"}]}"#;

/// Pulls a geocodable place name out of the query.
///
/// Reply: `{"location": string}`, empty when there is no place.
pub const LOCATION: &str = r#"Find the place the user's request refers to, if any, and return it as a
search string for a geocoder. Include enough context to identify the place
uniquely. If the request mentions no place, return an empty string.

Examples:
- "cloudless imagery over France" -> "France"
- "show me images of Paris in Michigan" -> "Paris, Michigan"
- "do you have anything from Georgia the country" -> "Georgia the country"

Respond with a JSON object: {"location": "<place or empty string>"}"#;

/// Pulls a date interval out of the query.
///
/// Reply: `{"datetime": string | null}`.
pub const TEMPORAL: &str = r#"Find the time range the user's request refers to, if any.
Express it as START/END using YYYY-MM-DD dates. Use ".." for an open end,
for example "2023-01-01/.." or "../2023-12-31". Resolve relative expressions
such as "last summer" against the current date. If the request has no time
range, return null.

Respond with a JSON object: {"datetime": "<START/END>" or null}"#;

/// Builds a CQL2-JSON attribute filter when the query implies one.
///
/// Reply: `{"filter": object | null}`.
pub const FILTER: &str = r#"Decide whether the user's request needs an attribute filter on STAC items and,
if so, write it in CQL2-JSON.

A comparison looks like {"op": "lte", "args": [{"property": "eo:cloud_cover"}, 10]}.
Comparisons can be combined: {"op": "and", "args": [<filter>, <filter>]}.
Allowed operators: and, or, not, eq, neq, gt, gte, lt, lte.

The only property you may use is:
- "eo:cloud_cover": cloud cover percentage from 0 to 100. "Cloudless" or
  "cloud-free" means a cloud cover of at most 10.

Examples:
- "cloudless imagery" -> {"op": "lte", "args": [{"property": "eo:cloud_cover"}, 10]}
- "imagery over Brazil with cloud cover between 10 and 20" ->
  {"op": "and", "args": [{"op": "gte", "args": [{"property": "eo:cloud_cover"}, 10]}, {"op": "lte", "args": [{"property": "eo:cloud_cover"}, 20]}]}

Return null when no filter is needed, when you cannot tell, or when the
request filters on anything other than the allowed property.

Respond with a JSON object: {"filter": <CQL2 object or null>}"#;

/// Temporal prompt with the current date appended.
pub fn temporal_system(today: NaiveDate) -> String {
    format!("{}\n\nThe current date is {}.", TEMPORAL, today.format("%Y-%m-%d"))
}

/// User message listing the candidate collections to re-rank.
pub fn rerank_user(query: &str, candidates: &[IndexHit]) -> String {
    let listing = candidates
        .iter()
        .map(|c| {
            format!(
                "Collection ID: {}\nTitle: {}\nDescription: {}",
                c.collection_id, c.title, c.description
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!("User query: \"{}\"\n\nCollections to evaluate:\n{}", query, listing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporal_system_has_date() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let prompt = temporal_system(date);
        assert!(prompt.starts_with(TEMPORAL));
        assert!(prompt.ends_with("The current date is 2025-03-14."));
    }

    #[test]
    fn test_rerank_user_lists_candidates() {
        let hits = vec![
            IndexHit {
                collection_id: "naip".to_string(),
                title: "NAIP".to_string(),
                description: "Aerial imagery of the US".to_string(),
                score: 0.9,
            },
            IndexHit {
                collection_id: "sentinel-2-l2a".to_string(),
                title: "Sentinel-2 Level-2A".to_string(),
                description: "Global multispectral imagery".to_string(),
                score: 0.5,
            },
        ];
        let msg = rerank_user("NAIP imagery from Washington state", &hits);
        assert!(msg.starts_with("User query: \"NAIP imagery from Washington state\""));
        assert!(msg.contains("Collection ID: naip\nTitle: NAIP"));
        assert!(msg.contains("Collection ID: sentinel-2-l2a"));
    }

    #[test]
    fn test_prompts_request_json() {
        for prompt in [FRAMING, RERANK, LOCATION, TEMPORAL, FILTER] {
            assert!(prompt.contains("JSON object"));
        }
    }
}
