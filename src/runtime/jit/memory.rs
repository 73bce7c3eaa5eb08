//! Executable memory owned by compiled executables.

use std::fmt;
use std::io;

use memmap2::{Mmap, MmapMut};

/// Named set of memory mappings holding the code and read-only data of one
/// executable. Mappings are released when the `CodeMemory` is dropped, so it
/// must outlive every call into the code it holds.
pub struct CodeMemory {
    name: String,
    segments: Vec<Mmap>,
}

impl CodeMemory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            segments: Vec::new(),
        }
    }

    /// Region name the mappings are tagged with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copies `code` into a fresh mapping and makes it executable. Returns
    /// the address of the first byte.
    pub fn map_code(&mut self, code: &[u8]) -> io::Result<*const u8> {
        let mapping = Self::copy_into_mapping(code)?.make_exec()?;
        Ok(self.push(mapping))
    }

    /// Copies `data` into a fresh read-only mapping.
    pub fn map_data(&mut self, data: &[u8]) -> io::Result<*const u8> {
        let mapping = Self::copy_into_mapping(data)?.make_read_only()?;
        Ok(self.push(mapping))
    }

    pub fn allocated_bytes(&self) -> usize {
        self.segments.iter().map(|segment| segment.len()).sum()
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    fn copy_into_mapping(bytes: &[u8]) -> io::Result<MmapMut> {
        if bytes.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot map an empty segment",
            ));
        }
        let mut mapping = MmapMut::map_anon(bytes.len())?;
        mapping.copy_from_slice(bytes);
        Ok(mapping)
    }

    fn push(&mut self, mapping: Mmap) -> *const u8 {
        let address = mapping.as_ptr();
        self.segments.push(mapping);
        address
    }
}

impl fmt::Debug for CodeMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeMemory")
            .field("name", &self.name)
            .field("segments", &self.segments.len())
            .field("bytes", &self.allocated_bytes())
            .finish()
    }
}

fn escape_region_name(region: &str) -> String {
    region.split('/').collect::<Vec<_>>().join("__")
}

/// Name tagging the memory of one executable, for example
/// `/jitrt:kernels__gemm:@module::@main:specialized:2`.
pub fn memory_region_name(
    region: &str,
    module: &str,
    entrypoint: &str,
    specialization: Option<usize>,
) -> String {
    let separator = if region.is_empty() { "" } else { ":" };
    let kind = specialization.map_or_else(
        || "default".to_string(),
        |id| format!("specialized:{id}"),
    );
    format!(
        "/jitrt{separator}{}:@{module}::@{entrypoint}:{kind}",
        escape_region_name(region)
    )
}
