//! Prompt construction for the two reasoning calls.
//!
//! Holds the fixed description of the spatial schema and builds the message
//! lists for hypothesis generation and evaluation.

use crate::llm::types::{Conversation, Message};

/// Description of the spatial store, embedded in the generation prompt.
pub const SPATIAL_SCHEMA: &str = r#"All geometry columns are named geom, type geometry, SRID 4326 (lon/lat).

sold_properties (residential sale records, Dublin region)
  address text, sale_price numeric, asking_price numeric, price_per_sqm numeric,
  floor_area_m2 numeric, beds integer, baths integer, sale_date date, url text, geom (Point)

cadastral_freehold (freehold land parcels, large: always filter spatially)
  ogc_fid integer, nationalcadastralreference text, gml_id text, area_sqm numeric, geom (Polygon)

cadastral_leasehold (leasehold land parcels, large: always filter spatially)
  ogc_fid integer, nationalcadastralreference text, gml_id text, area_sqm numeric, geom (Polygon)

rzlt (Residential Zoned Land Tax sites)
  ogc_fid integer, zone_desc text, zone_gzt text, gzt_desc text, site_area numeric,
  local_authority_name text, geom (MultiPolygon)

dlr_planning_polygons (Dun Laoghaire-Rathdown planning applications, site outlines)
  plan_ref text, county text, plan_auth text, reg_date date, descrptn text, location text,
  stage text, decision text, app_dec text, dec_date date, more_info text, geom (Polygon)

dlr_planning_points (the same planning applications as points)
  plan_ref text, county text, plan_auth text, reg_date date, descrptn text, location text,
  stage text, decision text, app_dec text, dec_date date, more_info text, geom (Point)"#;

const GENERATION_PROMPT_TEMPLATE: &str = r#"You are a property development analyst working against a PostGIS database.
Given the developer's question, propose 3 to 5 distinct analytical hypotheses about where
opportunities might be, and for each one write 1 to 3 SQL queries that test it.

DATABASE SCHEMA:
{schema}

SQL RULES:
- PostgreSQL with PostGIS. SELECT statements only, one statement per query, no trailing semicolon.
- Only use the tables listed above.
- Always return the geometry as ST_AsGeoJSON(geom) AS geometry. Never return raw geom.
- Filter the large tables spatially with the && operator or ST_DWithin so indexes are used.
- Every query ends with LIMIT 25.
- Prefer returning identifying columns (address, plan_ref, nationalcadastralreference) and the
  numbers that support the hypothesis.

OUTPUT FORMAT:
Return a single JSON object and nothing else:
{"hypotheses": [{"name": "...", "rationale": "...",
  "queries": [{"description": "...", "sql": "SELECT ..."}]}]}"#;

const EVALUATION_PROMPT: &str = r#"You are a property development analyst. You are given the developer's question and the
results of SQL queries run to test several hypotheses. Pick the best concrete sites across all
results and rank them.

Each result is identified by hypothesis_index, query_index and, within its sample rows,
row_index. All indices are 0-based. Only cite rows that appear in the samples.

OUTPUT FORMAT:
Return a single JSON object and nothing else:
{"title": "short title", "summary": "2-4 sentence narrative",
 "ranked_sites": [{"hypothesis_index": 0, "query_index": 0, "row_index": 0,
   "score": 0-100, "reason": "one sentence"}],
 "follow_ups": ["question 1", "question 2", "question 3"]}

Rank between 8 and 15 sites when the data allows it, best first. Give exactly 3 follow-up
questions the developer could ask next."#;

/// Builds the system prompt for hypothesis generation.
pub fn build_generation_prompt() -> String {
    GENERATION_PROMPT_TEMPLATE.replace("{schema}", SPATIAL_SCHEMA)
}

/// Builds the message list for hypothesis generation.
///
/// Combines the system prompt with the whole conversation so far.
pub fn build_generation_messages(conversation: &Conversation) -> Vec<Message> {
    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.push(Message::system(build_generation_prompt()));
    messages.extend(conversation.messages().iter().cloned());
    messages
}

/// Builds the message list for evaluation from the question and the result digest.
pub fn build_evaluation_messages(user_query: &str, digest: &str) -> Vec<Message> {
    vec![
        Message::system(EVALUATION_PROMPT),
        Message::user(format!(
            "QUESTION:\n{}\n\nRESULTS:\n{}",
            user_query, digest
        )),
    ]
}
