//! Record-level filter + copy pipeline.
//!
//! A [`RecordFilter`] narrows a file to streams (include/exclude selectors),
//! record types, and a time range; [`copy_records`] streams the selection
//! into a new file, either **verbatim** (compressed payloads copied byte for
//! byte, no decode) or **re-encoded** (decode, optionally transform, emit
//! with a new compression preset).
//!
//! # Stream selectors
//!
//! * `T-I` — one stream by numeric name
//! * `T+N` — the Nth instance (1-based) of type `T`
//! * `T-`  — every instance of type `T`
//! * `T-<flavor>` — every instance of type `T` with that flavor
//!
//! # Time bounds
//!
//! `--after` / `--before` take absolute timestamps, or signed offsets:
//! `+x` is relative to the first record, `-x` to the last.  `--around c w`
//! keeps `[c - w/2, c + w/2]` and cannot be combined with relative bounds.
//!
//! # Pre-roll
//!
//! For every selected stream, the latest configuration and state records at
//! or before the range start are included ahead of the data records, so a
//! reader of the copy can always establish decoder state.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use log::info;

use crate::compress::{compress, CompressionMethod, CompressionPreset};
use crate::description::FileDescription;
use crate::error::{Result, VrsError};
use crate::format::RecordProlog;
use crate::index::IndexEntry;
use crate::reader::{RecordFileReader, RecordInfo};
use crate::recordable::TAG_FLAVOR;
use crate::stream_id::{RecordType, StreamId};
use crate::writer::{FileEmitter, RecordFileWriterOptions};

// ── Selectors ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSelector {
    Exact(StreamId),
    /// 1-based Nth instance of a type, in stream-id order.
    NthOfType(u16, u16),
    AllOfType(u16),
    Flavor(u16, String),
}

impl StreamSelector {
    /// Parse the CLI grammar.  `1000-1`, `1000+2`, `1000-`, `1000-slam/left`.
    pub fn parse(s: &str) -> Option<Self> {
        if let Some((t, rest)) = s.split_once('+') {
            let type_id = t.parse().ok()?;
            let nth = rest.parse().ok()?;
            return Some(StreamSelector::NthOfType(type_id, nth));
        }
        let (t, rest) = s.split_once('-')?;
        let type_id = t.parse().ok()?;
        if rest.is_empty() {
            return Some(StreamSelector::AllOfType(type_id));
        }
        if let Ok(instance) = rest.parse::<u16>() {
            if instance > 0 {
                return Some(StreamSelector::Exact(StreamId::new(type_id, instance)));
            }
            return None;
        }
        Some(StreamSelector::Flavor(type_id, rest.to_string()))
    }

    fn resolve(&self, reader: &RecordFileReader, out: &mut BTreeSet<StreamId>) {
        match self {
            StreamSelector::Exact(id) => {
                if reader.stream_info(*id).is_some() {
                    out.insert(*id);
                }
            }
            StreamSelector::NthOfType(type_id, nth) => {
                let mut of_type: Vec<StreamId> = reader
                    .stream_ids()
                    .into_iter()
                    .filter(|id| id.type_id == *type_id)
                    .collect();
                of_type.sort();
                if *nth >= 1 {
                    if let Some(id) = of_type.get(*nth as usize - 1) {
                        out.insert(*id);
                    }
                }
            }
            StreamSelector::AllOfType(type_id) => {
                out.extend(reader.stream_ids().iter().filter(|id| id.type_id == *type_id));
            }
            StreamSelector::Flavor(type_id, flavor) => {
                for id in reader.stream_ids() {
                    if id.type_id != *type_id {
                        continue;
                    }
                    let matches = reader
                        .get_tags(id)
                        .and_then(|d| d.vrs_tags.get(TAG_FLAVOR))
                        .map(|f| f == flavor)
                        .unwrap_or(false);
                    if matches {
                        out.insert(id);
                    }
                }
            }
        }
    }
}

// ── Time bounds ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeSpec {
    Absolute(f64),
    /// `+x`: x seconds after the file's first record.
    AfterStart(f64),
    /// `-x`: x seconds before the file's last record.
    BeforeEnd(f64),
}

impl TimeSpec {
    /// Parse `12.5`, `+2`, `-0.5`.
    pub fn parse(s: &str) -> Option<Self> {
        if let Some(rest) = s.strip_prefix('+') {
            return rest.parse().ok().map(TimeSpec::AfterStart);
        }
        if let Some(rest) = s.strip_prefix('-') {
            return rest.parse().ok().map(TimeSpec::BeforeEnd);
        }
        s.parse().ok().map(TimeSpec::Absolute)
    }

    pub fn is_relative(&self) -> bool {
        !matches!(self, TimeSpec::Absolute(_))
    }

    fn resolve(&self, first: f64, last: f64) -> f64 {
        match self {
            TimeSpec::Absolute(t) => *t,
            TimeSpec::AfterStart(d) => first + d,
            TimeSpec::BeforeEnd(d) => last - d,
        }
    }
}

// ── RecordFilter ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub include_streams: Vec<StreamSelector>,
    pub exclude_streams: Vec<StreamSelector>,
    pub include_types: BTreeSet<RecordType>,
    pub exclude_types: BTreeSet<RecordType>,
    pub after: Option<TimeSpec>,
    pub before: Option<TimeSpec>,
    /// (center, window): keep `[center - window/2, center + window/2]`.
    pub around: Option<(f64, f64)>,
    /// Minimum spacing between kept data records, per stream.
    pub decimate_interval: Option<f64>,
}

impl RecordFilter {
    /// Apply one `+`/`-` token: a record type name or a stream selector.
    pub fn add_token(&mut self, include: bool, token: &str) -> Result<()> {
        if let Some(rt) = RecordType::from_name(token) {
            if include {
                self.include_types.insert(rt);
            } else {
                self.exclude_types.insert(rt);
            }
            return Ok(());
        }
        match StreamSelector::parse(token) {
            Some(selector) => {
                if include {
                    self.include_streams.push(selector);
                } else {
                    self.exclude_streams.push(selector);
                }
                Ok(())
            }
            None => Err(VrsError::InvalidParameter(format!(
                "bad stream or type selector '{token}'"
            ))),
        }
    }

    /// Validate bound combinations (the `--around` + relative rule).
    pub fn validate(&self) -> Result<()> {
        if self.around.is_some() {
            let relative = self.after.map_or(false, |t| t.is_relative())
                || self.before.map_or(false, |t| t.is_relative());
            if relative {
                return Err(VrsError::InvalidParameter(
                    "--around cannot be combined with relative --after/--before".into(),
                ));
            }
        }
        Ok(())
    }

    fn type_included(&self, rt: RecordType) -> bool {
        if self.exclude_types.contains(&rt) {
            return false;
        }
        self.include_types.is_empty() || self.include_types.contains(&rt)
    }

    /// Resolve stream selectors against a file.  No include selectors means
    /// every stream, minus the excluded ones.
    pub fn resolve_streams(&self, reader: &RecordFileReader) -> BTreeSet<StreamId> {
        let mut included: BTreeSet<StreamId> = if self.include_streams.is_empty() {
            reader.stream_ids().into_iter().collect()
        } else {
            let mut set = BTreeSet::new();
            for selector in &self.include_streams {
                selector.resolve(reader, &mut set);
            }
            set
        };
        let mut excluded = BTreeSet::new();
        for selector in &self.exclude_streams {
            selector.resolve(reader, &mut excluded);
        }
        included.retain(|id| !excluded.contains(id));
        included
    }

    /// Resolve the time range against the file's first/last record.
    pub fn resolve_time_range(&self, reader: &RecordFileReader) -> Result<(f64, f64)> {
        self.validate()?;
        let index = reader.index();
        let first = index.first().map(|e| e.timestamp).unwrap_or(0.0);
        let last = index.last().map(|e| e.timestamp).unwrap_or(0.0);
        if let Some((center, window)) = self.around {
            return Ok((center - window / 2.0, center + window / 2.0));
        }
        let min = self.after.map(|t| t.resolve(first, last)).unwrap_or(f64::NEG_INFINITY);
        let max = self.before.map(|t| t.resolve(first, last)).unwrap_or(f64::INFINITY);
        Ok((min, max))
    }

    /// Select index entries: pre-roll configuration/state, then everything
    /// matching streams, types, range, and decimation, in file order.
    pub fn select(&self, reader: &RecordFileReader) -> Result<Vec<IndexEntry>> {
        let streams = self.resolve_streams(reader);
        let (min_ts, max_ts) = self.resolve_time_range(reader)?;

        let mut preroll: BTreeMap<(StreamId, RecordType), IndexEntry> = BTreeMap::new();
        let mut body: Vec<IndexEntry> = Vec::new();
        let mut last_kept: BTreeMap<StreamId, f64> = BTreeMap::new();

        for entry in reader.index() {
            if !streams.contains(&entry.stream_id) {
                continue;
            }
            let in_range = entry.timestamp >= min_ts && entry.timestamp <= max_ts;
            match entry.record_type {
                RecordType::Configuration | RecordType::State => {
                    if !self.type_included(entry.record_type) {
                        continue;
                    }
                    if entry.timestamp < min_ts {
                        // Latest one before the range wins (pre-roll).
                        preroll.insert((entry.stream_id, entry.record_type), *entry);
                    } else if in_range {
                        body.push(*entry);
                    }
                }
                _ => {
                    if !in_range || !self.type_included(entry.record_type) {
                        continue;
                    }
                    if entry.record_type == RecordType::Data {
                        if let Some(interval) = self.decimate_interval {
                            if let Some(last) = last_kept.get(&entry.stream_id) {
                                if entry.timestamp - last < interval {
                                    continue;
                                }
                            }
                            last_kept.insert(entry.stream_id, entry.timestamp);
                        }
                    }
                    body.push(*entry);
                }
            }
        }

        let mut selected: Vec<IndexEntry> = preroll.into_values().collect();
        selected.sort_by(|a, b| a.cmp_order(b));
        selected.extend(body);
        Ok(selected)
    }
}

// ── Copy pipeline ────────────────────────────────────────────────────────────

pub enum CopyMode {
    /// Copy compressed payloads byte for byte; no decode.
    Verbatim,
    /// Decode, optionally transform each record payload, re-emit with the
    /// given preset.
    Reencode {
        preset: CompressionPreset,
        transform: Option<Box<dyn FnMut(&RecordInfo, Vec<u8>) -> Vec<u8>>>,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CopyStats {
    pub records_copied: usize,
    pub streams_kept: usize,
}

/// Copy the records selected by `filter` from `reader` into `target`.
pub fn copy_records<P: AsRef<Path>>(
    reader: &mut RecordFileReader,
    target: P,
    filter: &RecordFilter,
    mut mode: CopyMode,
    options: &RecordFileWriterOptions,
) -> Result<CopyStats> {
    let selected = filter.select(reader)?;
    let streams = filter.resolve_streams(reader);

    // The copy's description: same file tags, roster narrowed to the kept
    // streams (their RF:/DL: tags travel along).
    let description = FileDescription {
        file_tags: reader.file_tags().clone(),
        streams: reader
            .description()
            .streams
            .iter()
            .filter(|s| streams.contains(&s.stream_id()))
            .cloned()
            .collect(),
    };

    let mut emitter = FileEmitter::create(target.as_ref(), options, &description)?;
    let mut seen_streams: HashSet<StreamId> = HashSet::new();

    for entry in &selected {
        seen_streams.insert(entry.stream_id);
        match &mut mode {
            CopyMode::Verbatim => {
                let (prolog, raw) = reader.load_record_verbatim(entry)?;
                emitter.emit_prolog_record(&prolog, &raw)?;
            }
            CopyMode::Reencode { preset, transform } => {
                let (info, payload) = reader.load_record_payload(entry)?;
                let payload = match transform {
                    Some(f) => f(&info, payload),
                    None => payload,
                };
                let (method, wire) = encode_payload(&payload, *preset)?;
                let prolog = RecordProlog {
                    stream_id: info.stream_id,
                    record_type: info.record_type,
                    format_version: info.format_version,
                    timestamp: info.timestamp,
                    compression: method as u8,
                    uncompressed_size: payload.len() as u64,
                };
                emitter.emit_prolog_record(&prolog, &wire)?;
            }
        }
    }

    emitter.finish(&description)?;
    info!(
        "copied {} records from {} streams to {}",
        selected.len(),
        seen_streams.len(),
        target.as_ref().display()
    );
    Ok(CopyStats { records_copied: selected.len(), streams_kept: seen_streams.len() })
}

/// Merge several related files into one, applying `filter` per source file.
///
/// Records are emitted in the merged global order with their stream ids
/// rewritten to the disambiguated namespace; payloads are copied verbatim.
pub fn merge_records<P: AsRef<Path>>(
    multi: &mut crate::multi_reader::MultiRecordFileReader,
    target: P,
    filter: &RecordFilter,
    options: &RecordFileWriterOptions,
) -> Result<CopyStats> {
    // Per-file selection by record offset.
    let mut selected: Vec<HashSet<i64>> = Vec::with_capacity(multi.file_count());
    for i in 0..multi.file_count() {
        let reader = multi
            .reader(i)
            .ok_or_else(|| VrsError::InvalidState("reader index out of range".into()))?;
        selected.push(filter.select(reader)?.iter().map(|e| e.offset).collect());
    }

    // Merged roster: every stream under its disambiguated id, tags intact.
    let mut description = FileDescription::default();
    if let Some(first) = multi.reader(0) {
        description.file_tags = first.file_tags().clone();
    }
    for merged_id in multi.stream_ids() {
        if let Some(tags) = multi.get_tags(merged_id) {
            let mut stream = tags.clone();
            stream.type_id = merged_id.type_id;
            stream.instance_id = merged_id.instance_id;
            description.streams.push(stream);
        }
    }

    let mut emitter = FileEmitter::create(target.as_ref(), options, &description)?;
    let mut copied = 0usize;
    let mut streams: HashSet<StreamId> = HashSet::new();
    let merged_entries: Vec<_> = multi.merged_index().to_vec();
    for merged in &merged_entries {
        if !selected[merged.reader_index].contains(&merged.entry.offset) {
            continue;
        }
        let (mut prolog, raw) = multi.load_record_verbatim(merged)?;
        prolog.stream_id = merged.stream_id;
        emitter.emit_prolog_record(&prolog, &raw)?;
        streams.insert(merged.stream_id);
        copied += 1;
    }
    emitter.finish(&description)?;
    Ok(CopyStats { records_copied: copied, streams_kept: streams.len() })
}

fn encode_payload(payload: &[u8], preset: CompressionPreset) -> Result<(CompressionMethod, Vec<u8>)> {
    if preset.method() == CompressionMethod::None {
        return Ok((CompressionMethod::None, payload.to_vec()));
    }
    let packed = compress(payload, preset)?;
    if packed.len() >= payload.len() {
        Ok((CompressionMethod::None, payload.to_vec()))
    } else {
        Ok((preset.method(), packed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_grammar() {
        assert_eq!(
            StreamSelector::parse("1000-1"),
            Some(StreamSelector::Exact(StreamId::new(1000, 1)))
        );
        assert_eq!(
            StreamSelector::parse("1000+2"),
            Some(StreamSelector::NthOfType(1000, 2))
        );
        assert_eq!(StreamSelector::parse("1000-"), Some(StreamSelector::AllOfType(1000)));
        assert_eq!(
            StreamSelector::parse("1000-slam/left"),
            Some(StreamSelector::Flavor(1000, "slam/left".into()))
        );
        assert_eq!(StreamSelector::parse("notastream"), None);
        assert_eq!(StreamSelector::parse("1000-0"), None);
    }

    #[test]
    fn time_spec_grammar() {
        assert_eq!(TimeSpec::parse("12.5"), Some(TimeSpec::Absolute(12.5)));
        assert_eq!(TimeSpec::parse("+2"), Some(TimeSpec::AfterStart(2.0)));
        assert_eq!(TimeSpec::parse("-0.5"), Some(TimeSpec::BeforeEnd(0.5)));
        assert_eq!(TimeSpec::parse("x"), None);
    }

    #[test]
    fn around_rejects_relative_bounds() {
        let mut filter = RecordFilter::default();
        filter.around = Some((5.0, 2.0));
        filter.after = Some(TimeSpec::AfterStart(1.0));
        assert!(matches!(
            filter.validate(),
            Err(VrsError::InvalidParameter(_))
        ));
        filter.after = Some(TimeSpec::Absolute(1.0));
        assert!(filter.validate().is_ok());
    }

    #[test]
    fn tokens_route_to_types_and_streams() {
        let mut filter = RecordFilter::default();
        filter.add_token(true, "data").unwrap();
        filter.add_token(false, "1000-2").unwrap();
        assert!(filter.include_types.contains(&RecordType::Data));
        assert_eq!(filter.exclude_streams.len(), 1);
        assert!(filter.add_token(true, "???").is_err());
    }
}
