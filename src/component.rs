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

//! Component registration: dense numeric ids and the narrow, monomorphized
//! function-pointer "vtable" each id carries for drop/move/serialize, in
//! place of a base-class-and-derived-templates hierarchy.

use std::any::TypeId;
use std::alloc::Layout;

use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use speedy::{Readable, Writable};

use crate::error::{EcsError, Result};

/// Marker trait for components. 'static, Send, Sync, blanket-implemented —
/// components never borrow data and may cross thread boundaries via the
/// per-pool locks in `pool.rs`.
pub trait Component: 'static + Send + Sync {}
impl<T: 'static + Send + Sync> Component for T {}

/// Dense small-integer id for a registered component type. Component sets are
/// bit masks over this space (see `bitset.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub(crate) u32);

impl ComponentId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

unsafe fn drop_fn<T>(ptr: *mut u8) {
    unsafe { std::ptr::drop_in_place(ptr as *mut T) };
}

fn write_binary_fn<T: Writable<speedy::LittleEndian>>(
    ptr: *const u8,
    out: &mut Vec<u8>,
) -> Result<()> {
    let value = unsafe { &*(ptr as *const T) };
    let bytes = value
        .write_to_vec()
        .map_err(|e| EcsError::SerializationFormatError(e.to_string()))?;
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&bytes);
    Ok(())
}

fn read_binary_fn<T: for<'a> Readable<'a, speedy::LittleEndian>>(
    input: &[u8],
) -> Result<(Box<[u8]>, usize)> {
    if input.len() < 4 {
        return Err(EcsError::SerializationFormatError(
            "truncated component length prefix".into(),
        ));
    }
    let len = u32::from_le_bytes(input[0..4].try_into().unwrap()) as usize;
    let body = input
        .get(4..4 + len)
        .ok_or_else(|| EcsError::SerializationFormatError("truncated component body".into()))?;
    let value = T::read_from_buffer(body)
        .map_err(|e| EcsError::SerializationFormatError(e.to_string()))?;
    let raw = unsafe {
        std::slice::from_raw_parts(&value as *const T as *const u8, std::mem::size_of::<T>())
    }
    .to_vec()
    .into_boxed_slice();
    std::mem::forget(value);
    Ok((raw, 4 + len))
}

fn write_json_fn<T: Serialize>(ptr: *const u8) -> Result<serde_json::Value> {
    let value = unsafe { &*(ptr as *const T) };
    serde_json::to_value(value).map_err(|e| EcsError::SerializationFormatError(e.to_string()))
}

fn read_json_fn<T: DeserializeOwned>(value: &serde_json::Value) -> Result<Box<[u8]>> {
    let parsed: T = serde_json::from_value(value.clone())
        .map_err(|e| EcsError::SerializationFormatError(e.to_string()))?;
    let raw = unsafe {
        std::slice::from_raw_parts(&parsed as *const T as *const u8, std::mem::size_of::<T>())
    }
    .to_vec()
    .into_boxed_slice();
    std::mem::forget(parsed);
    Ok(raw)
}

/// Monomorphized serialization hooks for one component type. Every function
/// pointer here closes over no state; the narrow vtable strategy from the
/// design notes.
#[derive(Clone, Copy)]
pub struct SerdeHooks {
    pub write_binary: fn(*const u8, &mut Vec<u8>) -> Result<()>,
    pub read_binary: fn(&[u8]) -> Result<(Box<[u8]>, usize)>,
    pub write_json: fn(*const u8) -> Result<serde_json::Value>,
    pub read_json: fn(&serde_json::Value) -> Result<Box<[u8]>>,
}

/// Everything the archetype store and serializer need to treat a component
/// type as opaque bytes: size, alignment, drop, and (optionally) the
/// serialization vtable above.
#[derive(Clone)]
pub struct ComponentInfo {
    pub id: ComponentId,
    pub type_id: TypeId,
    pub name: &'static str,
    pub layout: Layout,
    pub drop_fn: unsafe fn(*mut u8),
    pub serde: Option<SerdeHooks>,
}

impl ComponentInfo {
    /// A Rust move is always a bitwise copy of the value's representation —
    /// there is no user-defined move constructor to invoke, unlike the
    /// C++ source this substrate replaces. Migration code may `ptr::copy`
    /// directly using `layout.size()`.
    pub fn move_bytes(&self, src: *const u8, dst: *mut u8) {
        unsafe { std::ptr::copy_nonoverlapping(src, dst, self.layout.size()) };
    }
}

/// Assigns dense ids to component types and stores the per-type vtable used
/// by the archetype store and the serializer.
#[derive(Default)]
pub struct ComponentRegistry {
    by_type: FxHashMap<TypeId, ComponentId>,
    infos: Vec<ComponentInfo>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T`, or returns its existing id if already registered.
    pub fn register<T: Component>(&mut self) -> ComponentId {
        if let Some(&id) = self.by_type.get(&TypeId::of::<T>()) {
            return id;
        }
        let id = ComponentId(self.infos.len() as u32);
        self.infos.push(ComponentInfo {
            id,
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            layout: Layout::new::<T>(),
            drop_fn: drop_fn::<T>,
            serde: None,
        });
        self.by_type.insert(TypeId::of::<T>(), id);
        id
    }

    /// Registers `T` and attaches binary + text serialization hooks.
    /// Registering the same type twice with different serde capability is a
    /// `DuplicateRegistration` error per the error taxonomy.
    pub fn register_serializable<T>(&mut self) -> Result<ComponentId>
    where
        T: Component + Serialize + DeserializeOwned,
        T: Writable<speedy::LittleEndian> + for<'a> Readable<'a, speedy::LittleEndian>,
    {
        if let Some(&id) = self.by_type.get(&TypeId::of::<T>()) {
            if self.infos[id.index()].serde.is_some() {
                return Err(EcsError::DuplicateRegistration(id));
            }
            self.infos[id.index()].serde = Some(SerdeHooks {
                write_binary: write_binary_fn::<T>,
                read_binary: read_binary_fn::<T>,
                write_json: write_json_fn::<T>,
                read_json: read_json_fn::<T>,
            });
            return Ok(id);
        }
        let id = self.register::<T>();
        self.infos[id.index()].serde = Some(SerdeHooks {
            write_binary: write_binary_fn::<T>,
            read_binary: read_binary_fn::<T>,
            write_json: write_json_fn::<T>,
            read_json: read_json_fn::<T>,
        });
        Ok(id)
    }

    pub fn id_of<T: Component>(&self) -> Option<ComponentId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    pub fn info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.infos.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.iter()
    }
}
