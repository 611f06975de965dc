//! Device-side descriptor heaps wrapping the neutral cursor machinery.

use std::hash::{Hash, Hasher};

use fnv::FnvHasher;
use windows::Win32::Graphics::Direct3D12::*;

use crate::descriptors::{BackingAlloc, DescriptorRing, SamplerBlock, SamplerCache};
use crate::{
    GfxError, GfxResult, TextureFlags, BACKING_DESCRIPTORS, DSV_DESCRIPTORS, MAX_DESCRIPTORS,
    MAX_SAMPLER_DESCRIPTORS, MAX_SHADER_RESOURCES, NUM_FRAMES, RTV_DESCRIPTORS,
};

fn create_descriptor_heap(
    device: &ID3D12Device,
    ty: D3D12_DESCRIPTOR_HEAP_TYPE,
    num_descriptors: u32,
    shader_visible: bool,
) -> GfxResult<ID3D12DescriptorHeap> {
    let heap: ID3D12DescriptorHeap = unsafe {
        device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
            Type: ty,
            NumDescriptors: num_descriptors,
            Flags: if shader_visible {
                D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
            } else {
                D3D12_DESCRIPTOR_HEAP_FLAG_NONE
            },
            NodeMask: 1,
        })?
    };
    Ok(heap)
}

/// Shader-visible SRV/CBV/UAV ring plus the persistent backing store the
/// per-resource views live in.
pub(crate) struct SrvHeap {
    pub heap: ID3D12DescriptorHeap,
    backing_heap: ID3D12DescriptorHeap,
    ring: DescriptorRing,
    pub backing: BackingAlloc,
    backing_cpu_begin: u64,
    increment: u32,
}

impl SrvHeap {
    pub fn new(device: &ID3D12Device) -> GfxResult<Self> {
        let ty = D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV;
        let heap = create_descriptor_heap(device, ty, MAX_DESCRIPTORS * NUM_FRAMES, true)?;
        let backing_heap = create_descriptor_heap(device, ty, BACKING_DESCRIPTORS, false)?;
        let increment = unsafe { device.GetDescriptorHandleIncrementSize(ty) };
        let gpu_begin = unsafe { heap.GetGPUDescriptorHandleForHeapStart() }.ptr;
        let cpu_begin = unsafe { heap.GetCPUDescriptorHandleForHeapStart() }.ptr as u64;
        let backing_cpu_begin =
            unsafe { backing_heap.GetCPUDescriptorHandleForHeapStart() }.ptr as u64;
        Ok(Self {
            heap,
            backing_heap,
            ring: DescriptorRing::new(gpu_begin, cpu_begin, increment, MAX_DESCRIPTORS, NUM_FRAMES),
            backing: BackingAlloc::new(BACKING_DESCRIPTORS),
            backing_cpu_begin,
            increment,
        })
    }

    fn backing_cpu(&self, id: u32) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: (self.backing_cpu_begin + id as u64 * self.increment as u64) as usize,
        }
    }

    /// Build a shader-resource view into a fresh backing slot.
    pub fn alloc_srv(
        &mut self,
        device: &ID3D12Device,
        resource: &ID3D12Resource,
        desc: &D3D12_SHADER_RESOURCE_VIEW_DESC,
    ) -> GfxResult<u32> {
        let id = self
            .backing
            .alloc()
            .ok_or_else(|| GfxError::from("backing descriptor store exhausted"))?;
        unsafe {
            device.CreateShaderResourceView(resource, Some(desc), self.backing_cpu(id));
        }
        Ok(id)
    }

    /// Copy one backing view into the current ring window.
    pub fn copy(&mut self, device: &ID3D12Device, id: u32) {
        let slot = self.ring.alloc(1);
        unsafe {
            device.CopyDescriptorsSimple(
                1,
                D3D12_CPU_DESCRIPTOR_HANDLE {
                    ptr: slot.cpu as usize,
                },
                self.backing_cpu(id),
                D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
            );
        }
    }

    /// GPU address a descriptor table bound before a batch of copies points
    /// at.
    pub fn table_start(&self) -> D3D12_GPU_DESCRIPTOR_HANDLE {
        D3D12_GPU_DESCRIPTOR_HANDLE {
            ptr: self.ring.cursor().gpu,
        }
    }

    pub fn next_frame(&mut self) {
        self.ring.next_frame();
    }
}

/// Deduplicated shader-visible sampler heap. Never reset; bounded by the
/// number of distinct texture-flag fingerprints the application reaches.
pub(crate) struct SamplerHeap {
    pub heap: ID3D12DescriptorHeap,
    cache: SamplerCache,
    gpu_begin: u64,
    cpu_begin: u64,
    increment: u32,
}

impl SamplerHeap {
    pub fn new(device: &ID3D12Device) -> GfxResult<Self> {
        let ty = D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER;
        let heap = create_descriptor_heap(device, ty, MAX_SAMPLER_DESCRIPTORS, true)?;
        let increment = unsafe { device.GetDescriptorHandleIncrementSize(ty) };
        Ok(Self {
            gpu_begin: unsafe { heap.GetGPUDescriptorHandleForHeapStart() }.ptr,
            cpu_begin: unsafe { heap.GetCPUDescriptorHandleForHeapStart() }.ptr as u64,
            heap,
            cache: SamplerCache::new(MAX_SAMPLER_DESCRIPTORS),
            increment,
        })
    }

    /// Resolve the sampler block for the currently bound texture set,
    /// building samplers on a first-seen fingerprint.
    pub fn alloc_samplers(
        &mut self,
        device: &ID3D12Device,
        slot_flags: &[Option<TextureFlags>; MAX_SHADER_RESOURCES],
    ) -> D3D12_GPU_DESCRIPTOR_HANDLE {
        let mut words = [0_u32; MAX_SHADER_RESOURCES];
        for (word, flags) in words.iter_mut().zip(slot_flags.iter()) {
            *word = flags.map_or(0, TextureFlags::bits);
        }
        let mut hasher = FnvHasher::default();
        words.hash(&mut hasher);
        let fingerprint = hasher.finish() as u32;

        let offset = match self
            .cache
            .lookup_or_reserve(fingerprint, MAX_SHADER_RESOURCES as u32)
        {
            SamplerBlock::Cached { offset } => offset,
            SamplerBlock::Fresh { offset } => {
                for (i, flags) in slot_flags.iter().enumerate() {
                    let Some(flags) = flags else { continue };
                    let desc = D3D12_SAMPLER_DESC {
                        Filter: if flags.contains(TextureFlags::POINT_FILTER) {
                            D3D12_FILTER_MIN_MAG_MIP_POINT
                        } else {
                            D3D12_FILTER_MIN_MAG_MIP_LINEAR
                        },
                        AddressU: address_mode(flags.contains(TextureFlags::CLAMP_U)),
                        AddressV: address_mode(flags.contains(TextureFlags::CLAMP_V)),
                        AddressW: address_mode(flags.contains(TextureFlags::CLAMP_W)),
                        MipLODBias: 0.0,
                        MaxAnisotropy: 1,
                        ComparisonFunc: D3D12_COMPARISON_FUNC_ALWAYS,
                        BorderColor: [0.0; 4],
                        MinLOD: -1000.0,
                        MaxLOD: 1000.0,
                    };
                    let cpu = D3D12_CPU_DESCRIPTOR_HANDLE {
                        ptr: (self.cpu_begin
                            + (offset as u64 + i as u64) * self.increment as u64)
                            as usize,
                    };
                    unsafe {
                        device.CreateSampler(&desc, cpu);
                    }
                }
                offset
            }
        };

        D3D12_GPU_DESCRIPTOR_HANDLE {
            ptr: self.gpu_begin + offset as u64 * self.increment as u64,
        }
    }
}

fn address_mode(clamp: bool) -> D3D12_TEXTURE_ADDRESS_MODE {
    if clamp {
        D3D12_TEXTURE_ADDRESS_MODE_CLAMP
    } else {
        D3D12_TEXTURE_ADDRESS_MODE_WRAP
    }
}

/// Per-frame ring of RTV or DSV slots; views are rebuilt into fresh slots
/// every frame rather than cached.
pub(crate) struct ViewHeap {
    pub heap: ID3D12DescriptorHeap,
    ring: DescriptorRing,
}

impl ViewHeap {
    pub fn new_rtv(device: &ID3D12Device) -> GfxResult<Self> {
        Self::new(device, D3D12_DESCRIPTOR_HEAP_TYPE_RTV, RTV_DESCRIPTORS)
    }

    pub fn new_dsv(device: &ID3D12Device) -> GfxResult<Self> {
        Self::new(device, D3D12_DESCRIPTOR_HEAP_TYPE_DSV, DSV_DESCRIPTORS)
    }

    fn new(
        device: &ID3D12Device,
        ty: D3D12_DESCRIPTOR_HEAP_TYPE,
        num_descriptors: u32,
    ) -> GfxResult<Self> {
        let heap = create_descriptor_heap(device, ty, num_descriptors * NUM_FRAMES, false)?;
        let increment = unsafe { device.GetDescriptorHandleIncrementSize(ty) };
        let cpu_begin = unsafe { heap.GetCPUDescriptorHandleForHeapStart() }.ptr as u64;
        Ok(Self {
            heap,
            // non-shader-visible heaps have no GPU address; only the CPU
            // side of the ring is meaningful
            ring: DescriptorRing::new(0, cpu_begin, increment, num_descriptors, NUM_FRAMES),
        })
    }

    pub fn alloc(&mut self) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: self.ring.alloc(1).cpu as usize,
        }
    }

    pub fn next_frame(&mut self) {
        self.ring.next_frame();
    }
}
