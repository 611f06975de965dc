//! Swap-chain and window management.

use windows::core::Interface;
use windows::Win32::Foundation::{HWND, RECT};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::UI::WindowsAndMessaging::GetClientRect;

use crate::{GfxResult, NUM_FRAMES};

pub(crate) struct Window {
    pub hwnd: HWND,
    pub swapchain: IDXGISwapChain3,
    pub backbuffers: Vec<ID3D12Resource>,
    pub size: (i32, i32),
}

pub(crate) fn client_size(hwnd: HWND) -> (i32, i32) {
    let mut rect = RECT::default();
    unsafe {
        GetClientRect(hwnd, &mut rect);
    }
    (rect.right - rect.left, rect.bottom - rect.top)
}

impl Window {
    pub fn new(
        factory: &IDXGIFactory4,
        queue: &ID3D12CommandQueue,
        hwnd: HWND,
    ) -> GfxResult<Self> {
        let size = client_size(hwnd);
        let desc = DXGI_SWAP_CHAIN_DESC1 {
            BufferCount: NUM_FRAMES,
            Width: size.0 as u32,
            Height: size.1 as u32,
            Format: DXGI_FORMAT_R8G8B8A8_UNORM,
            Flags: DXGI_SWAP_CHAIN_FLAG_FRAME_LATENCY_WAITABLE_OBJECT.0 as u32,
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            AlphaMode: DXGI_ALPHA_MODE_UNSPECIFIED,
            Scaling: DXGI_SCALING_STRETCH,
            ..Default::default()
        };

        let swapchain1 =
            unsafe { factory.CreateSwapChainForHwnd(queue, hwnd, &desc, None, None)? };
        let swapchain: IDXGISwapChain3 = swapchain1.cast()?;
        unsafe {
            swapchain.SetMaximumFrameLatency(NUM_FRAMES)?;
        }

        let backbuffers = acquire_backbuffers(&swapchain)?;
        Ok(Self {
            hwnd,
            swapchain,
            backbuffers,
            size,
        })
    }

    pub fn current_backbuffer(&self) -> &ID3D12Resource {
        &self.backbuffers[unsafe { self.swapchain.GetCurrentBackBufferIndex() } as usize]
    }

    /// Drop the old back buffers and resize the swap chain; every frame must
    /// be retired before this is called.
    pub fn resize(&mut self, size: (i32, i32)) -> GfxResult<()> {
        self.backbuffers.clear();
        unsafe {
            self.swapchain.ResizeBuffers(
                0,
                size.0 as u32,
                size.1 as u32,
                DXGI_FORMAT_UNKNOWN,
                DXGI_SWAP_CHAIN_FLAG_FRAME_LATENCY_WAITABLE_OBJECT.0 as u32,
            )?;
        }
        self.backbuffers = acquire_backbuffers(&self.swapchain)?;
        self.size = size;
        Ok(())
    }
}

fn acquire_backbuffers(swapchain: &IDXGISwapChain3) -> GfxResult<Vec<ID3D12Resource>> {
    let mut backbuffers = Vec::with_capacity(NUM_FRAMES as usize);
    for i in 0..NUM_FRAMES {
        let backbuffer: ID3D12Resource = unsafe { swapchain.GetBuffer(i)? };
        unsafe {
            backbuffer.SetName(windows::core::w!("window_rb")).ok();
        }
        backbuffers.push(backbuffer);
    }
    Ok(backbuffers)
}
