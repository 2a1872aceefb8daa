// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! World snapshot and restore: binary and text formats, sharing the same
//! semantic content, plus an incremental delta mode layered on
//! [`crate::change::ChangeTracker`].
//!
//! Binary framing: `[MAGIC:4][VERSION:4][METADATA][ENTITY_RECORD]*[TRAILER:4][CHECKSUM:32]`.
//! A load never leaves its target world partially mutated: the whole stream
//! is parsed and validated into an in-memory entity list against the
//! target's existing component registry first; only a fully-parsed
//! snapshot reaches `World::clear` and `World::spawn_raw`.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::change::{ChangeKind, SubscriptionToken};
use crate::component::ComponentId;
use crate::entity::EntityHandle;
use crate::error::{EcsError, Result};
use crate::world::World;

const MAGIC: [u8; 4] = *b"AECS";
const TRAILER: [u8; 4] = *b"END!";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Binary,
    Text,
}

/// What to do on load when the stream references a component id with no
/// registered loader, or on save when a present component has no
/// serializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownComponentPolicy {
    Skip,
    Fail,
}

#[derive(Debug, Clone)]
pub struct SerializeOptions {
    pub include: Option<Vec<ComponentId>>,
    pub exclude: Vec<ComponentId>,
    pub metadata: HashMap<String, String>,
    pub unknown_component_policy: UnknownComponentPolicy,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            include: None,
            exclude: Vec::new(),
            metadata: HashMap::new(),
            unknown_component_policy: UnknownComponentPolicy::Skip,
        }
    }
}

impl SerializeOptions {
    fn wants(&self, id: ComponentId) -> bool {
        if self.exclude.contains(&id) {
            return false;
        }
        match &self.include {
            Some(allowed) => allowed.contains(&id),
            None => true,
        }
    }
}

/// Metadata record written first in every save, binary or text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub timestamp_unix: u64,
    pub entity_count: usize,
    pub registered_component_ids: Vec<u32>,
    pub custom_metadata: HashMap<String, String>,
}

fn io_err(e: std::io::Error) -> EcsError {
    EcsError::SerializationFormatError(e.to_string())
}

fn write_u32<W: Write>(w: &mut W, v: u32) -> Result<()> {
    w.write_all(&v.to_le_bytes()).map_err(io_err)
}

fn write_u64<W: Write>(w: &mut W, v: u64) -> Result<()> {
    w.write_all(&v.to_le_bytes()).map_err(io_err)
}

fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> Result<()> {
    write_u32(w, bytes.len() as u32)?;
    w.write_all(bytes).map_err(io_err)
}

fn write_string<W: Write>(w: &mut W, s: &str) -> Result<()> {
    write_bytes(w, s.as_bytes())
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| EcsError::SerializationFormatError("truncated stream".into()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn string(&mut self) -> Result<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes)
            .map_err(|e| EcsError::SerializationFormatError(e.to_string()))
    }
}

/// Wide, non-cryptographic content hash. Not collision-resistant against an
/// adversary; sufficient to catch accidental truncation/corruption, which is
/// all the format's integrity check promises.
fn content_hash32(data: &[u8]) -> [u8; 32] {
    const SEEDS: [u64; 4] = [
        0xcbf2_9ce4_8422_2325,
        0x9e37_79b9_7f4a_7c15,
        0x1000_0000_01b3_9a71,
        0xff51_afd7_ed55_8ccd,
    ];
    let mut out = [0u8; 32];
    for (chunk, seed) in out.chunks_mut(8).zip(SEEDS.iter()) {
        let mut hash = *seed;
        for &byte in data {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        chunk.copy_from_slice(&hash.to_le_bytes());
    }
    out
}

fn registered_ids(world: &World, options: &SerializeOptions) -> Vec<u32> {
    world
        .component_registry()
        .iter()
        .map(|info| info.id)
        .filter(|&id| options.wants(id))
        .map(|id| id.index() as u32)
        .collect()
}

fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn build_metadata(world: &World, options: &SerializeOptions, entity_count: usize) -> SnapshotMetadata {
    SnapshotMetadata {
        format_version: FORMAT_VERSION,
        timestamp_unix: unix_timestamp(),
        entity_count,
        registered_component_ids: registered_ids(world, options),
        custom_metadata: options.metadata.clone(),
    }
}

fn write_metadata_header<W: Write>(buf: &mut W, metadata: &SnapshotMetadata) -> Result<()> {
    write_u32(buf, metadata.format_version)?;
    write_u64(buf, metadata.timestamp_unix)?;
    write_u32(buf, metadata.entity_count as u32)?;
    write_u32(buf, metadata.registered_component_ids.len() as u32)?;
    for id in &metadata.registered_component_ids {
        write_u32(buf, *id)?;
    }
    write_u32(buf, metadata.custom_metadata.len() as u32)?;
    for (k, v) in &metadata.custom_metadata {
        write_string(buf, k)?;
        write_string(buf, v)?;
    }
    Ok(())
}

/// Encodes one entity's wanted components into `buf` using the same framing
/// `parse_binary`/[`StreamReader`] expect: `[index][generation][count][(id,payload)]*`.
fn write_entity_binary<W: Write>(
    buf: &mut W,
    world: &World,
    entity: EntityHandle,
    options: &SerializeOptions,
) -> Result<()> {
    write_u32(buf, entity.index())?;
    write_u32(buf, entity.generation())?;
    let ids = world.component_ids_of(entity);
    let mut written = Vec::with_capacity(ids.len());
    for id in ids {
        if !options.wants(id) {
            continue;
        }
        let Some(info) = world.component_registry().info(id) else {
            continue;
        };
        let Some(hooks) = info.serde else {
            if options.unknown_component_policy == UnknownComponentPolicy::Fail {
                return Err(EcsError::SerializationFormatError(format!(
                    "component {:?} has no registered serializer",
                    id
                )));
            }
            continue;
        };
        let Some(bytes) = world.raw_component_bytes(entity, id) else {
            continue;
        };
        let mut payload = Vec::new();
        (hooks.write_binary)(bytes.as_ptr(), &mut payload)?;
        written.push((id, payload));
    }
    write_u32(buf, written.len() as u32)?;
    for (id, payload) in written {
        write_u32(buf, id.index() as u32)?;
        buf.write_all(&payload).map_err(io_err)?;
    }
    Ok(())
}

/// Decodes one entity record from `reader`, positioned right after the
/// header (or after a previous call). Shared by [`WorldSerializer::parse_binary`]
/// and [`StreamReader::next_entity`] so the two paths can't drift apart.
fn decode_entity_record(
    reader: &mut ByteReader,
    world: &World,
    options: &SerializeOptions,
) -> Result<(EntityHandle, Vec<(ComponentId, Vec<u8>)>)> {
    let index = reader.u32()?;
    let generation = reader.u32()?;
    let component_count = reader.u32()?;
    let mut components = Vec::with_capacity(component_count as usize);
    for _ in 0..component_count {
        let raw_id = reader.u32()?;
        let id = ComponentId(raw_id);
        let payload_start = reader.pos;
        let len = reader.u32()? as usize;
        let _ = reader.take(len)?;
        let payload = &reader.data[payload_start..reader.pos];
        let Some(info) = world.component_registry().info(id) else {
            if options.unknown_component_policy == UnknownComponentPolicy::Fail {
                return Err(EcsError::UnknownComponentId(id));
            }
            continue;
        };
        let Some(hooks) = info.serde else {
            if options.unknown_component_policy == UnknownComponentPolicy::Fail {
                return Err(EcsError::UnknownComponentId(id));
            }
            continue;
        };
        let (bytes, _consumed) = (hooks.read_binary)(payload)?;
        components.push((id, bytes.into_vec()));
    }
    Ok((EntityHandle { index, generation }, components))
}

/// Validates magic/version/checksum and decodes the metadata header, leaving
/// the returned reader positioned at the first entity record. Used by every
/// binary read path, including the standalone metadata/integrity checks that
/// never touch entity data at all.
fn parse_header(raw: &[u8]) -> Result<(SnapshotMetadata, ByteReader)> {
    if raw.len() < 4 + 32 {
        return Err(EcsError::SerializationFormatError("truncated stream".into()));
    }
    let body_len = raw.len() - 32;
    let checksum = &raw[body_len..];
    if content_hash32(&raw[..body_len]).as_slice() != checksum {
        return Err(EcsError::SerializationFormatError(
            "checksum mismatch".into(),
        ));
    }

    let mut reader = ByteReader::new(&raw[..body_len]);
    if reader.take(4)? != MAGIC {
        return Err(EcsError::SerializationFormatError("bad magic".into()));
    }
    let version = reader.u32()?;
    if version != FORMAT_VERSION {
        return Err(EcsError::SerializationFormatError(format!(
            "unsupported format version {version}"
        )));
    }

    let format_version = reader.u32()?;
    let timestamp_unix = reader.u64()?;
    let entity_count = reader.u32()? as usize;
    let registered_count = reader.u32()?;
    let mut registered_component_ids = Vec::with_capacity(registered_count as usize);
    for _ in 0..registered_count {
        registered_component_ids.push(reader.u32()?);
    }
    let metadata_count = reader.u32()?;
    let mut custom_metadata = HashMap::with_capacity(metadata_count as usize);
    for _ in 0..metadata_count {
        let k = reader.string()?;
        let v = reader.string()?;
        custom_metadata.insert(k, v);
    }
    let metadata = SnapshotMetadata {
        format_version,
        timestamp_unix,
        entity_count,
        registered_component_ids,
        custom_metadata,
    };
    Ok((metadata, reader))
}

/// Reads just the metadata header of a binary snapshot, verifying the
/// checksum along the way but never decoding a single component payload.
/// For inspecting a snapshot (format version, entity count, custom tags)
/// without paying for a full load.
pub fn read_metadata(raw: &[u8]) -> Result<SnapshotMetadata> {
    parse_header(raw).map(|(metadata, _)| metadata)
}

/// Verifies a binary snapshot's checksum and header without decoding any
/// entity. Returns the same error a full `load` would fail with, so callers
/// can reject a corrupt snapshot up front.
pub fn validate_integrity(raw: &[u8]) -> Result<()> {
    parse_header(raw).map(|_| ())
}

/// Reads just the metadata of a text snapshot. `serde_json` skips over the
/// `entities` array structurally without materializing any component value.
pub fn read_metadata_text(raw: &[u8]) -> Result<SnapshotMetadata> {
    #[derive(Deserialize)]
    struct MetaOnly {
        metadata: SnapshotMetadata,
    }
    let doc: MetaOnly =
        serde_json::from_slice(raw).map_err(|e| EcsError::SerializationFormatError(e.to_string()))?;
    Ok(doc.metadata)
}

/// Confirms a text snapshot parses and carries a format version this crate
/// understands, without decoding any entity.
pub fn validate_integrity_text(raw: &[u8]) -> Result<()> {
    let metadata = read_metadata_text(raw)?;
    if metadata.format_version != FORMAT_VERSION {
        return Err(EcsError::SerializationFormatError(format!(
            "unsupported format version {}",
            metadata.format_version
        )));
    }
    Ok(())
}

/// Saves/loads a [`World`] in either the binary or text framing described in
/// the module documentation.
pub struct WorldSerializer;

impl WorldSerializer {
    pub fn save<W: Write>(world: &World, sink: &mut W, format: Format, options: &SerializeOptions) -> Result<()> {
        match format {
            Format::Binary => Self::save_binary(world, sink, options),
            Format::Text => Self::save_text(world, sink, options),
        }
    }

    /// Destructive: `world`'s entities are replaced with the snapshot's.
    /// The whole stream is parsed into an in-memory entity list against
    /// `world`'s existing component registry *before* anything is mutated,
    /// so a corrupt or unreadable stream leaves `world` untouched; only a
    /// fully-parsed snapshot reaches `clear` + `spawn_raw`.
    pub fn load<R: Read>(world: &mut World, source: &mut R, format: Format, options: &SerializeOptions) -> Result<()> {
        let mut raw = Vec::new();
        source.read_to_end(&mut raw).map_err(io_err)?;
        let entities = match format {
            Format::Binary => Self::parse_binary(&raw, world, options)?,
            Format::Text => Self::parse_text(&raw, world, options)?,
        };
        world.clear();
        for components in entities {
            world.spawn_raw(components)?;
        }
        Ok(())
    }

    /// Saves only `entities` (and only their components `options` admits),
    /// rather than the whole world. Everything else about the framing is
    /// identical to [`WorldSerializer::save`], so a subset snapshot reads
    /// back through the same `load`/`load_subset` paths.
    pub fn save_subset<W: Write>(
        world: &World,
        entities: &[EntityHandle],
        sink: &mut W,
        format: Format,
        options: &SerializeOptions,
    ) -> Result<()> {
        match format {
            Format::Binary => Self::save_binary_entities(world, entities.iter().copied(), sink, options),
            Format::Text => Self::save_text_entities(world, entities.iter().copied(), sink, options),
        }
    }

    /// Loads a subset snapshot written by [`WorldSerializer::save_subset`].
    /// Unlike `load`, `world` is never cleared: entities are spawned fresh
    /// alongside whatever `world` already holds, and their new handles are
    /// returned in snapshot order. A corrupt stream still leaves `world`
    /// untouched, for the same reason `load` does.
    pub fn load_subset<R: Read>(
        world: &mut World,
        source: &mut R,
        format: Format,
        options: &SerializeOptions,
    ) -> Result<Vec<EntityHandle>> {
        let mut raw = Vec::new();
        source.read_to_end(&mut raw).map_err(io_err)?;
        let entities = match format {
            Format::Binary => Self::parse_binary(&raw, world, options)?,
            Format::Text => Self::parse_text(&raw, world, options)?,
        };
        entities
            .into_iter()
            .map(|components| world.spawn_raw(components))
            .collect()
    }

    fn save_binary<W: Write>(world: &World, sink: &mut W, options: &SerializeOptions) -> Result<()> {
        Self::save_binary_entities(world, world.all_entities().into_iter(), sink, options)
    }

    fn save_binary_entities<W: Write>(
        world: &World,
        entities: impl Iterator<Item = EntityHandle> + Clone,
        sink: &mut W,
        options: &SerializeOptions,
    ) -> Result<()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        write_u32(&mut buf, FORMAT_VERSION)?;

        let metadata = build_metadata(world, options, entities.clone().count());
        write_metadata_header(&mut buf, &metadata)?;

        for entity in entities {
            write_entity_binary(&mut buf, world, entity, options)?;
        }

        buf.extend_from_slice(&TRAILER);
        let checksum = content_hash32(&buf);
        buf.extend_from_slice(&checksum);
        sink.write_all(&buf).map_err(io_err)
    }

    fn parse_binary(
        raw: &[u8],
        world: &World,
        options: &SerializeOptions,
    ) -> Result<Vec<Vec<(ComponentId, Vec<u8>)>>> {
        let (metadata, mut reader) = parse_header(raw)?;
        let mut entities = Vec::with_capacity(metadata.entity_count);
        for _ in 0..metadata.entity_count {
            let (_, components) = decode_entity_record(&mut reader, world, options)?;
            entities.push(components);
        }
        Ok(entities)
    }

    fn save_text<W: Write>(world: &World, sink: &mut W, options: &SerializeOptions) -> Result<()> {
        Self::save_text_entities(world, world.all_entities().into_iter(), sink, options)
    }

    fn save_text_entities<W: Write>(
        world: &World,
        entities_iter: impl Iterator<Item = EntityHandle> + Clone,
        sink: &mut W,
        options: &SerializeOptions,
    ) -> Result<()> {
        #[derive(Serialize)]
        struct TextComponent {
            id: u32,
            value: serde_json::Value,
        }
        #[derive(Serialize)]
        struct TextEntity {
            index: u32,
            generation: u32,
            components: Vec<TextComponent>,
        }
        #[derive(Serialize)]
        struct TextDocument {
            metadata: SnapshotMetadata,
            entities: Vec<TextEntity>,
        }

        let metadata = build_metadata(world, options, entities_iter.clone().count());
        let mut entities = Vec::new();
        for entity in entities_iter {
            let mut components = Vec::new();
            for id in world.component_ids_of(entity) {
                if !options.wants(id) {
                    continue;
                }
                let Some(info) = world.component_registry().info(id) else {
                    continue;
                };
                let Some(hooks) = info.serde else {
                    if options.unknown_component_policy == UnknownComponentPolicy::Fail {
                        return Err(EcsError::SerializationFormatError(format!(
                            "component {:?} has no registered serializer",
                            id
                        )));
                    }
                    continue;
                };
                let Some(bytes) = world.raw_component_bytes(entity, id) else {
                    continue;
                };
                let value = (hooks.write_json)(bytes.as_ptr())?;
                components.push(TextComponent {
                    id: id.index() as u32,
                    value,
                });
            }
            entities.push(TextEntity {
                index: entity.index(),
                generation: entity.generation(),
                components,
            });
        }

        let doc = TextDocument { metadata, entities };
        serde_json::to_writer_pretty(sink, &doc)
            .map_err(|e| EcsError::SerializationFormatError(e.to_string()))
    }

    fn parse_text(
        raw: &[u8],
        world: &World,
        options: &SerializeOptions,
    ) -> Result<Vec<Vec<(ComponentId, Vec<u8>)>>> {
        #[derive(Deserialize)]
        struct TextComponent {
            id: u32,
            value: serde_json::Value,
        }
        #[derive(Deserialize)]
        struct TextEntity {
            #[allow(dead_code)]
            index: u32,
            #[allow(dead_code)]
            generation: u32,
            components: Vec<TextComponent>,
        }
        #[derive(Deserialize)]
        struct TextDocument {
            #[allow(dead_code)]
            metadata: SnapshotMetadata,
            entities: Vec<TextEntity>,
        }

        let doc: TextDocument = serde_json::from_slice(raw)
            .map_err(|e| EcsError::SerializationFormatError(e.to_string()))?;

        let mut entities = Vec::with_capacity(doc.entities.len());
        for entity in doc.entities {
            let mut components = Vec::with_capacity(entity.components.len());
            for component in entity.components {
                let id = ComponentId(component.id);
                let Some(info) = world.component_registry().info(id) else {
                    if options.unknown_component_policy == UnknownComponentPolicy::Fail {
                        return Err(EcsError::UnknownComponentId(id));
                    }
                    continue;
                };
                let Some(hooks) = info.serde else {
                    if options.unknown_component_policy == UnknownComponentPolicy::Fail {
                        return Err(EcsError::UnknownComponentId(id));
                    }
                    continue;
                };
                let bytes = (hooks.read_json)(&component.value)?;
                components.push((id, bytes.into_vec()));
            }
            entities.push(components);
        }
        Ok(entities)
    }
}

/// Binary writer that accepts entities one at a time instead of demanding
/// the whole world up front, for callers streaming a large population out
/// of something other than a `World` (a level editor's undo buffer, a
/// network replay capture). Entity bodies are encoded as each
/// [`StreamWriter::write_entity`] call arrives, so memory held here never
/// exceeds the already-encoded bytes plus the caller's own working set;
/// only the header (which needs the final entity count) is deferred to
/// [`StreamWriter::finalize`].
pub struct StreamWriter<W: Write> {
    sink: W,
    options: SerializeOptions,
    body: Vec<u8>,
    entity_count: u32,
}

impl<W: Write> StreamWriter<W> {
    pub fn open_write(sink: W, options: SerializeOptions) -> Self {
        Self {
            sink,
            options,
            body: Vec::new(),
            entity_count: 0,
        }
    }

    /// Encodes one entity into the pending body. Order is preserved; a
    /// `load`/`load_subset` call reads entities back in the order they were
    /// written.
    pub fn write_entity(&mut self, world: &World, entity: EntityHandle) -> Result<()> {
        write_entity_binary(&mut self.body, world, entity, &self.options)?;
        self.entity_count += 1;
        Ok(())
    }

    /// Writes the header (now that the entity count is known) followed by
    /// every buffered entity record, the trailer, and the checksum, then
    /// flushes the sink. `world` is only consulted for the registered
    /// component id list in the metadata header.
    pub fn finalize(mut self, world: &World) -> Result<()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        write_u32(&mut buf, FORMAT_VERSION)?;
        let metadata = build_metadata(world, &self.options, self.entity_count as usize);
        write_metadata_header(&mut buf, &metadata)?;
        buf.append(&mut self.body);
        buf.extend_from_slice(&TRAILER);
        let checksum = content_hash32(&buf);
        buf.extend_from_slice(&checksum);
        self.sink.write_all(&buf).map_err(io_err)
    }
}

/// Binary reader that hands back one entity at a time instead of collecting
/// the whole snapshot into an intermediate `Vec`. The header (and therefore
/// the checksum) is still validated eagerly at [`StreamReader::open_read`]
/// time, since a truncated/corrupt stream has to be rejected before any
/// entity is handed to the caller; what streaming buys here is that a
/// caller processing millions of entities one at a time never holds more
/// than one decoded entity's components in memory at once.
pub struct StreamReader<'a> {
    reader: ByteReader<'a>,
    remaining: u32,
    options: SerializeOptions,
}

impl<'a> StreamReader<'a> {
    pub fn open_read(raw: &'a [u8], options: SerializeOptions) -> Result<(SnapshotMetadata, Self)> {
        let (metadata, reader) = parse_header(raw)?;
        let remaining = metadata.entity_count as u32;
        Ok((
            metadata,
            Self {
                reader,
                remaining,
                options,
            },
        ))
    }

    /// Decodes and returns the next entity, or `None` once every entity
    /// the header declared has been consumed.
    pub fn next_entity(
        &mut self,
        world: &World,
    ) -> Result<Option<(EntityHandle, Vec<(ComponentId, Vec<u8>)>)>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        decode_entity_record(&mut self.reader, world, &self.options).map(Some)
    }
}

/// Incremental save: replays only the component changes accumulated since
/// the previous call (or since `start_tracking`). Layered on
/// [`crate::change::ChangeTracker`] via a subscription; raw bytes for
/// `Added`/`Modified` records are read from the world at flush time, which
/// assumes the component was not removed again before the next flush.
pub struct DeltaRecorder {
    token: SubscriptionToken,
    component: ComponentId,
    log: Arc<Mutex<Vec<(EntityHandle, ChangeKind, u32)>>>,
}

impl DeltaRecorder {
    pub fn start_tracking(world: &mut World, component: ComponentId) -> Self {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        let token = world.subscribe_changes(
            component,
            &[ChangeKind::Added, ChangeKind::Modified, ChangeKind::Removed],
            None,
            None,
            Box::new(move |records| {
                let mut guard = log2.lock().unwrap();
                guard.extend(records.iter().map(|r| (r.entity, r.kind, r.tick)));
            }),
        );
        Self {
            token,
            component,
            log,
        }
    }

    /// Writes every record accumulated since the last flush: `[count][entity_index][entity_generation][kind:1][tick][payload?]`.
    pub fn save_changes<W: Write>(&self, world: &World, sink: &mut W) -> Result<()> {
        let records: Vec<_> = std::mem::take(&mut *self.log.lock().unwrap());
        write_u32(sink, records.len() as u32)?;
        for (entity, kind, tick) in records {
            write_u32(sink, entity.index())?;
            write_u32(sink, entity.generation())?;
            sink.write_all(&[kind.code()]).map_err(io_err)?;
            write_u32(sink, tick)?;
            if kind != ChangeKind::Removed {
                let bytes = world
                    .raw_component_bytes(entity, self.component)
                    .unwrap_or(&[]);
                write_bytes(sink, bytes)?;
            }
        }
        Ok(())
    }

    pub fn stop(self, world: &mut World) {
        world.unsubscribe_changes(self.token);
    }
}

/// Replays a delta stream written by [`DeltaRecorder::save_changes`] for
/// `component` against `world`.
pub fn apply_changes<R: Read>(source: &mut R, world: &mut World, component: ComponentId) -> Result<()> {
    let mut raw = Vec::new();
    source.read_to_end(&mut raw).map_err(io_err)?;
    let mut reader = ByteReader::new(&raw);
    let count = reader.u32()?;
    for _ in 0..count {
        let index = reader.u32()?;
        let generation = reader.u32()?;
        let entity = EntityHandle { index, generation };
        let kind = ChangeKind::from_code(reader.take(1)?[0])
            .ok_or_else(|| EcsError::SerializationFormatError("bad change kind".into()))?;
        let _tick = reader.u32()?;
        match kind {
            ChangeKind::Removed => {
                world.detach_raw(entity, component)?;
            }
            ChangeKind::Added | ChangeKind::Modified => {
                let bytes = reader.bytes()?;
                if world.is_alive(entity) {
                    world.attach_raw(entity, component, bytes)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize as SerdeDeserialize;
    use speedy::{Readable, Writable};

    #[derive(Debug, Clone, Copy, PartialEq, Serialize, SerdeDeserialize, Writable, Readable)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[test]
    fn binary_round_trip_preserves_component_values() {
        let mut world = World::new();
        world.component_registry_mut().register_serializable::<Position>().unwrap();
        world.spawn().with(Position { x: 1.0, y: 2.0 }).build().unwrap();
        world.spawn().with(Position { x: 3.0, y: 4.0 }).build().unwrap();

        let mut buf = Vec::new();
        WorldSerializer::save(&world, &mut buf, Format::Binary, &SerializeOptions::default()).unwrap();

        let mut loaded = World::new();
        loaded.component_registry_mut().register_serializable::<Position>().unwrap();
        WorldSerializer::load(&mut loaded, &mut &buf[..], Format::Binary, &SerializeOptions::default()).unwrap();

        assert_eq!(loaded.entity_count(), 2);
        let mut seen: Vec<Position> = loaded
            .all_entities()
            .into_iter()
            .filter_map(|e| loaded.get_component::<Position>(e).copied())
            .collect();
        seen.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap());
        assert_eq!(seen, vec![Position { x: 1.0, y: 2.0 }, Position { x: 3.0, y: 4.0 }]);
    }

    #[test]
    fn corrupted_checksum_fails_load_atomically() {
        let mut world = World::new();
        world.component_registry_mut().register_serializable::<Position>().unwrap();
        world.spawn().with(Position { x: 1.0, y: 2.0 }).build().unwrap();

        let mut buf = Vec::new();
        WorldSerializer::save(&world, &mut buf, Format::Binary, &SerializeOptions::default()).unwrap();
        *buf.last_mut().unwrap() ^= 0xFF;

        let mut target = World::new();
        target.component_registry_mut().register_serializable::<Position>().unwrap();
        target.spawn().with(Position { x: 9.0, y: 9.0 }).build().unwrap();
        let err = WorldSerializer::load(&mut target, &mut &buf[..], Format::Binary, &SerializeOptions::default());
        assert!(err.is_err());
        assert_eq!(target.entity_count(), 1);
    }

    #[test]
    fn text_round_trip_preserves_component_values() {
        let mut world = World::new();
        world.component_registry_mut().register_serializable::<Position>().unwrap();
        world.spawn().with(Position { x: 5.0, y: 6.0 }).build().unwrap();

        let mut buf = Vec::new();
        WorldSerializer::save(&world, &mut buf, Format::Text, &SerializeOptions::default()).unwrap();

        let mut loaded = World::new();
        loaded.component_registry_mut().register_serializable::<Position>().unwrap();
        WorldSerializer::load(&mut loaded, &mut &buf[..], Format::Text, &SerializeOptions::default()).unwrap();

        let entity = loaded.all_entities()[0];
        assert_eq!(loaded.get_component::<Position>(entity), Some(&Position { x: 5.0, y: 6.0 }));
    }

    #[test]
    fn delta_recorder_replays_added_and_removed() {
        let mut world = World::new();
        let id = world.component_registry_mut().register_serializable::<Position>().unwrap();
        let recorder = DeltaRecorder::start_tracking(&mut world, id);
        let e = world.spawn().with(Position { x: 1.0, y: 1.0 }).build().unwrap();
        world.drain_changes();

        let mut buf = Vec::new();
        recorder.save_changes(&world, &mut buf).unwrap();

        let mut replay_target = World::new();
        replay_target.component_registry_mut().register_serializable::<Position>().unwrap();
        let replay_entity = replay_target.spawn().build().unwrap();
        assert_eq!(replay_entity.index(), e.index());
        apply_changes(&mut &buf[..], &mut replay_target, id).unwrap();
        assert_eq!(
            replay_target.get_component::<Position>(replay_entity),
            Some(&Position { x: 1.0, y: 1.0 })
        );

        recorder.stop(&mut world);
    }

    #[test]
    fn save_subset_and_load_subset_round_trip_only_the_chosen_entities() {
        let mut world = World::new();
        world.component_registry_mut().register_serializable::<Position>().unwrap();
        let a = world.spawn().with(Position { x: 1.0, y: 1.0 }).build().unwrap();
        let _b = world.spawn().with(Position { x: 2.0, y: 2.0 }).build().unwrap();
        let c = world.spawn().with(Position { x: 3.0, y: 3.0 }).build().unwrap();

        let mut buf = Vec::new();
        WorldSerializer::save_subset(&world, &[a, c], &mut buf, Format::Binary, &SerializeOptions::default())
            .unwrap();

        let mut target = World::new();
        target.component_registry_mut().register_serializable::<Position>().unwrap();
        target.spawn().with(Position { x: 9.0, y: 9.0 }).build().unwrap();
        let spawned = WorldSerializer::load_subset(
            &mut target,
            &mut &buf[..],
            Format::Binary,
            &SerializeOptions::default(),
        )
        .unwrap();

        // The pre-existing entity survives; only the subset was appended.
        assert_eq!(target.entity_count(), 3);
        assert_eq!(spawned.len(), 2);
        let mut xs: Vec<f32> = spawned
            .iter()
            .filter_map(|&e| target.get_component::<Position>(e).map(|p| p.x))
            .collect();
        xs.sort_by(|x, y| x.partial_cmp(y).unwrap());
        assert_eq!(xs, vec![1.0, 3.0]);
    }

    #[test]
    fn stream_writer_and_stream_reader_round_trip_entities_one_at_a_time() {
        let mut world = World::new();
        world.component_registry_mut().register_serializable::<Position>().unwrap();
        let entities: Vec<_> = (0..5)
            .map(|i| world.spawn().with(Position { x: i as f32, y: 0.0 }).build().unwrap())
            .collect();

        let mut buf = Vec::new();
        let mut writer = StreamWriter::open_write(&mut buf, SerializeOptions::default());
        for &e in &entities {
            writer.write_entity(&world, e).unwrap();
        }
        writer.finalize(&world).unwrap();

        let (metadata, mut reader) = StreamReader::open_read(&buf, SerializeOptions::default()).unwrap();
        assert_eq!(metadata.entity_count, 5);

        let mut xs = Vec::new();
        while let Some((_entity, components)) = reader.next_entity(&world).unwrap() {
            let (_id, bytes) = &components[0];
            let pos = unsafe { *(bytes.as_ptr() as *const Position) };
            xs.push(pos.x);
        }
        assert!(reader.next_entity(&world).unwrap().is_none());
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(xs, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn read_metadata_inspects_a_snapshot_without_loading_it() {
        let mut world = World::new();
        world.component_registry_mut().register_serializable::<Position>().unwrap();
        world.spawn().with(Position { x: 1.0, y: 2.0 }).build().unwrap();
        world.spawn().with(Position { x: 3.0, y: 4.0 }).build().unwrap();

        let mut options = SerializeOptions::default();
        options.metadata.insert("level".into(), "intro".into());

        let mut buf = Vec::new();
        WorldSerializer::save(&world, &mut buf, Format::Binary, &options).unwrap();

        let metadata = read_metadata(&buf).unwrap();
        assert_eq!(metadata.entity_count, 2);
        assert_eq!(metadata.custom_metadata.get("level").map(String::as_str), Some("intro"));
        assert!(validate_integrity(&buf).is_ok());

        let mut corrupted = buf.clone();
        *corrupted.last_mut().unwrap() ^= 0xFF;
        assert!(validate_integrity(&corrupted).is_err());
    }

    #[test]
    fn read_metadata_text_inspects_a_text_snapshot_without_loading_it() {
        let mut world = World::new();
        world.component_registry_mut().register_serializable::<Position>().unwrap();
        world.spawn().with(Position { x: 1.0, y: 2.0 }).build().unwrap();

        let mut buf = Vec::new();
        WorldSerializer::save(&world, &mut buf, Format::Text, &SerializeOptions::default()).unwrap();

        let metadata = read_metadata_text(&buf).unwrap();
        assert_eq!(metadata.entity_count, 1);
        assert!(validate_integrity_text(&buf).is_ok());
    }
}
