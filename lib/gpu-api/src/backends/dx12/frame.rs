//! The per-frame slot of the frame ring: command allocator, scratch upload
//! arena, release list and fence event.

use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Graphics::Direct3D::ID3DBlob;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject};
use windows::Win32::System::WindowsProgramming::INFINITE;

use crate::{GfxResult, SCRATCH_BUFFER_SIZE};

/// Native objects queued for release once the frame is retired.
pub(crate) enum Released {
    Resource(#[allow(dead_code)] ID3D12Resource),
    Blob(#[allow(dead_code)] ID3DBlob),
    /// A backing-heap view slot; recycled by the owner after retirement so
    /// any in-flight copy out of it has completed.
    HeapId(u32),
}

/// Create a committed buffer on the upload heap, optionally filled with
/// `data`.
pub(crate) fn create_upload_buffer(
    device: &ID3D12Device,
    data: Option<&[u8]>,
    size: u64,
) -> GfxResult<ID3D12Resource> {
    let props = D3D12_HEAP_PROPERTIES {
        Type: D3D12_HEAP_TYPE_UPLOAD,
        CreationNodeMask: 1,
        VisibleNodeMask: 1,
        ..Default::default()
    };
    let desc = D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
        Width: size,
        Height: 1,
        DepthOrArraySize: 1,
        MipLevels: 1,
        Format: DXGI_FORMAT_UNKNOWN,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
        Flags: D3D12_RESOURCE_FLAG_NONE,
        ..Default::default()
    };

    let mut buffer: Option<ID3D12Resource> = None;
    unsafe {
        device.CreateCommittedResource(
            &props,
            D3D12_HEAP_FLAG_NONE,
            &desc,
            D3D12_RESOURCE_STATE_GENERIC_READ,
            None,
            &mut buffer,
        )?;
    }
    let buffer = buffer.unwrap();

    if let Some(data) = data {
        unsafe {
            let mut ptr = std::ptr::null_mut();
            buffer.Map(0, None, Some(&mut ptr))?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len());
            buffer.Unmap(0, None);
        }
    }

    Ok(buffer)
}

pub(crate) struct Frame {
    pub cmd_allocator: ID3D12CommandAllocator,
    scratch_buffer: ID3D12Resource,
    scratch_begin: *mut u8,
    scratch_offset: usize,
    pub to_release: Vec<Released>,
    fence_event: Option<HANDLE>,
}

impl Frame {
    pub fn new(device: &ID3D12Device) -> GfxResult<Self> {
        let cmd_allocator: ID3D12CommandAllocator =
            unsafe { device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)? };

        let scratch_buffer = create_upload_buffer(device, None, SCRATCH_BUFFER_SIZE as u64)?;
        let mut scratch_begin = std::ptr::null_mut();
        unsafe {
            scratch_buffer.Map(0, None, Some(&mut scratch_begin))?;
        }

        Ok(Self {
            cmd_allocator,
            scratch_buffer,
            scratch_begin: scratch_begin as *mut u8,
            scratch_offset: 0,
            to_release: Vec::new(),
            fence_event: None,
        })
    }

    /// Block until the frame's submission has retired. A frame that was
    /// never submitted returns immediately.
    pub fn wait(&mut self) {
        if let Some(event) = self.fence_event.take() {
            unsafe {
                WaitForSingleObject(event, INFINITE);
                CloseHandle(event);
            }
        }
    }

    /// Wait for retirement, then hand back everything queued for release.
    /// The caller recycles heap ids and drops the rest.
    pub fn begin(&mut self) -> Vec<Released> {
        self.wait();
        self.scratch_offset = 0;
        std::mem::take(&mut self.to_release)
    }

    /// Close and submit the recorder, signal the fence and arm the event
    /// that [`Self::wait`] blocks on.
    pub fn end(
        &mut self,
        queue: &ID3D12CommandQueue,
        cmd_list: &ID3D12GraphicsCommandList,
        fence: &ID3D12Fence,
        fence_value: &mut u64,
    ) -> GfxResult<()> {
        unsafe {
            cmd_list.Close()?;
            let cmd = ID3D12CommandList::from(cmd_list);
            queue.ExecuteCommandLists(&[cmd]);
            *fence_value += 1;
            queue.Signal(fence, *fence_value)?;
            debug_assert!(self.fence_event.is_none());
            let event = CreateEventA(None, false, false, None)?;
            fence.SetEventOnCompletion(*fence_value, event)?;
            self.fence_event = Some(event);
        }
        Ok(())
    }

    /// Bump-allocate `size` bytes of the frame's staging arena. Returns the
    /// offset within the scratch buffer and a write pointer. Overflow is a
    /// caller bug; the arena is sized for the worst frame.
    pub fn scratch_alloc(&mut self, size: usize) -> (u64, *mut u8) {
        assert!(
            self.scratch_offset + size <= SCRATCH_BUFFER_SIZE,
            "frame scratch arena overflow ({} + {size} > {SCRATCH_BUFFER_SIZE})",
            self.scratch_offset
        );
        let offset = self.scratch_offset;
        self.scratch_offset += size;
        (offset as u64, unsafe {
            self.scratch_begin.add(offset)
        })
    }

    pub fn scratch_resource(&self) -> &ID3D12Resource {
        &self.scratch_buffer
    }
}
