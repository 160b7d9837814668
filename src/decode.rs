/// Streaming decoder for the `/epg` response body.
///
/// Guide payloads for a multi-day window can run to hundreds of megabytes,
/// and the target hardware has ~1GB of RAM, so the body is never
/// materialised as a `serde_json::Value` tree. Instead the document is
/// walked with `DeserializeSeed` implementations that build `Program`
/// values one at a time, and every string field is read through a
/// character-capped accessor so a single pathological field cannot
/// allocate unbounded memory.
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;

use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use tracing::warn;

use crate::models::{EpgResponse, Program};
use crate::time::parse_epg_timestamp;

/// Per-field character caps. Values over the cap are truncated, not
/// rejected.
#[derive(Debug, Clone)]
pub struct FieldCaps {
    pub id: usize,
    pub time: usize,
    pub title: usize,
    pub description: usize,
}

impl Default for FieldCaps {
    fn default() -> Self {
        FieldCaps {
            id: 128,
            time: 64,
            title: 256,
            description: 1_024,
        }
    }
}

/// Decode one `/epg` body. Any JSON error aborts the whole decode; callers
/// treat that as "no data", never as a partial result.
pub fn decode_epg_response<R: Read>(
    reader: R,
    caps: &FieldCaps,
) -> Result<EpgResponse, serde_json::Error> {
    let warned = Cell::new(false);
    let cx = DecodeCx {
        caps,
        warned: &warned,
    };
    let mut de = serde_json::Deserializer::from_reader(reader);
    let response = ResponseSeed { cx }.deserialize(&mut de)?;
    de.end()?;
    Ok(response)
}

/// State shared by all seeds of one decode pass: the caps, plus the
/// warn-once flag for truncated fields (a feed with thousands of oversized
/// descriptions must not flood the log).
#[derive(Clone, Copy)]
struct DecodeCx<'a> {
    caps: &'a FieldCaps,
    warned: &'a Cell<bool>,
}

// ── Top-level response ────────────────────────────────────────────────────────

struct ResponseSeed<'a> {
    cx: DecodeCx<'a>,
}

impl<'de> DeserializeSeed<'de> for ResponseSeed<'_> {
    type Value = EpgResponse;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for ResponseSeed<'_> {
    type Value = EpgResponse;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an EPG response object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut response = EpgResponse::default();

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "update_mode" => {
                    response.update_mode =
                        map.next_value_seed(CappedString::new(self.cx.caps.title, self.cx))?;
                }
                "timestamp" => {
                    response.timestamp =
                        map.next_value_seed(CappedString::new(self.cx.caps.time, self.cx))?;
                }
                "channels_requested" => {
                    response.channels_requested = next_count(&mut map)?;
                }
                "channels_found" => {
                    response.channels_found = next_count(&mut map)?;
                }
                "total_programs" => {
                    response.total_programs = next_count(&mut map)?;
                }
                "epg" => {
                    response.epg = map.next_value_seed(EpgMapSeed { cx: self.cx })?;
                }
                // Unknown keys are skipped for forward compatibility.
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        Ok(response)
    }
}

fn next_count<'de, A: MapAccess<'de>>(map: &mut A) -> Result<usize, A::Error> {
    let raw = map.next_value::<i64>()?;
    Ok(usize::try_from(raw).unwrap_or(0))
}

// ── Channel map ───────────────────────────────────────────────────────────────

struct EpgMapSeed<'a> {
    cx: DecodeCx<'a>,
}

impl<'de> DeserializeSeed<'de> for EpgMapSeed<'_> {
    type Value = HashMap<String, Vec<Program>>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for EpgMapSeed<'_> {
    type Value = HashMap<String, Vec<Program>>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of channel id to program list")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut epg = HashMap::new();
        while let Some(channel_id) = map.next_key::<String>()? {
            let programs = map.next_value_seed(ProgramListSeed { cx: self.cx })?;
            epg.insert(channel_id, programs);
        }
        Ok(epg)
    }
}

// ── Program list ──────────────────────────────────────────────────────────────

struct ProgramListSeed<'a> {
    cx: DecodeCx<'a>,
}

impl<'de> DeserializeSeed<'de> for ProgramListSeed<'_> {
    type Value = Vec<Program>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for ProgramListSeed<'_> {
    type Value = Vec<Program>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of programs")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut programs = Vec::new();
        while let Some(program) = seq.next_element_seed(ProgramSeed { cx: self.cx })? {
            programs.push(program);
        }
        Ok(programs)
    }
}

// ── Single program ────────────────────────────────────────────────────────────

struct ProgramSeed<'a> {
    cx: DecodeCx<'a>,
}

impl<'de> DeserializeSeed<'de> for ProgramSeed<'_> {
    type Value = Program;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for ProgramSeed<'_> {
    type Value = Program;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a program object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let caps = self.cx.caps;
        let mut id = String::new();
        let mut start_time = String::new();
        let mut stop_time = String::new();
        let mut title = String::new();
        let mut description = String::new();

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "id" => id = map.next_value_seed(CappedString::new(caps.id, self.cx))?,
                "start_time" => {
                    start_time = map.next_value_seed(CappedString::new(caps.time, self.cx))?;
                }
                "stop_time" => {
                    stop_time = map.next_value_seed(CappedString::new(caps.time, self.cx))?;
                }
                "title" => title = map.next_value_seed(CappedString::new(caps.title, self.cx))?,
                "description" => {
                    description =
                        map.next_value_seed(CappedString::new(caps.description, self.cx))?;
                }
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        Ok(Program {
            id,
            start_utc_millis: parse_epg_timestamp(&start_time),
            stop_utc_millis: parse_epg_timestamp(&stop_time),
            title,
            description,
        })
    }
}

// ── Capped string ─────────────────────────────────────────────────────────────

/// Reads a string value truncated to `max` characters. Null and
/// wrongly-typed values decode to the empty string rather than aborting,
/// matching how feeds in the wild omit or mangle optional fields.
struct CappedString<'a> {
    max: usize,
    cx: DecodeCx<'a>,
}

impl<'a> CappedString<'a> {
    fn new(max: usize, cx: DecodeCx<'a>) -> Self {
        CappedString { max, cx }
    }

    fn capped(&self, value: &str) -> String {
        match value.char_indices().nth(self.max) {
            None => value.to_string(),
            Some((cut, _)) => {
                if !self.cx.warned.replace(true) {
                    warn!(
                        "EPG field exceeded {} characters and was truncated \
                         (further truncation warnings suppressed for this response)",
                        self.max
                    );
                }
                value[..cut].to_string()
            }
        }
    }
}

impl<'de> DeserializeSeed<'de> for CappedString<'_> {
    type Value = String;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for CappedString<'_> {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(self.capped(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        if v.chars().count() <= self.max {
            Ok(v)
        } else {
            Ok(self.capped(&v))
        }
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(String::new())
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<Self::Value, E> {
        Ok(String::new())
    }

    fn visit_i64<E: de::Error>(self, _: i64) -> Result<Self::Value, E> {
        Ok(String::new())
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> Result<Self::Value, E> {
        Ok(String::new())
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<Self::Value, E> {
        Ok(String::new())
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(String::new())
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
        Ok(String::new())
    }
}
