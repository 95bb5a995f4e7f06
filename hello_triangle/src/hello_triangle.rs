use windows::{
    core::*, Win32::Foundation::*, Win32::Graphics::Direct3D::Fxc::*, Win32::Graphics::Direct3D::*,
    Win32::Graphics::Direct3D12::*, Win32::Graphics::Dxgi::Common::*, Win32::Graphics::Dxgi::*,
    Win32::System::LibraryLoader::*, Win32::System::Threading::*,
    Win32::UI::WindowsAndMessaging::*,
    Win32::Security::*, Win32::System::Memory::*,
};
use std::sync::{Arc, atomic::AtomicUsize};
use libc::{c_uint, c_char, c_void};

const BUFFER_COUNT: u32 = 2;

const SHADER_SOURCE: &str = include_str!("hello_triangle.hlsl");

const DEFAULT_RT_CLEAR_COLOR: [f32; 4] = [ 0.0, 0.2, 0.4, 1.0 ];

#[macro_export]
macro_rules! align {
    ($val:expr, $align:expr) => {{
        let a = $val as usize;
        let b = $align as usize;
        (a + b - 1) & !(b - 1)
    }}
}

pub trait D3DBase {
    fn draw(&mut self);
    fn present(&mut self) -> Result<()>;
    fn wait(&mut self) -> Result<()>;
    fn get_image(&mut self) -> (&ID3D12CommandQueue, &ID3D12Resource);
}

pub fn spawn_d3d_log_thread(log_atomic: Arc::<AtomicUsize>) -> std::thread::JoinHandle::<()>
{
    // The debug layer reports through OutputDebugString() which never reaches
    // a plain console, so we read the strings out of the DBWIN section and
    // forward them to the logger

    let sd = SECURITY_DESCRIPTOR{ ..Default::default() };
    let sa = SECURITY_ATTRIBUTES{
        nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: &sd as *const _ as *mut _,
        bInheritHandle: BOOL(1)
    };
    unsafe { InitializeSecurityDescriptor(PSECURITY_DESCRIPTOR(&sd as *const _ as *mut _), 1) };
    unsafe { SetSecurityDescriptorDacl(PSECURITY_DESCRIPTOR(&sd as *const _ as *mut _), BOOL(1), None, BOOL(0)) };

    let db_ack = "DBWIN_BUFFER_READY\0".encode_utf16().collect::<Vec<u16>>();
    let db_rdy = "DBWIN_DATA_READY\0".encode_utf16().collect::<Vec<u16>>();
    let h_ack = unsafe { CreateEventW(Some(&sa), BOOL(0), BOOL(0), PCWSTR(db_ack.as_ptr())) }.unwrap();
    let h_rdy = unsafe { CreateEventW(Some(&sa), BOOL(0), BOOL(0), PCWSTR(db_rdy.as_ptr())) }.unwrap();

    let log_size = 8192u32;
    let db = "DBWIN_BUFFER\0".encode_utf16().collect::<Vec<u16>>();
    let fh = unsafe { CreateFileMappingW(INVALID_HANDLE_VALUE, Some(&sa), PAGE_READWRITE, 0, log_size, PCWSTR(db.as_ptr())) }.unwrap();

    let pid = unsafe { GetCurrentProcessId() };

    std::thread::spawn(move || {
        let mmf = unsafe { MapViewOfFile(fh, FILE_MAP_READ, 0, 0, log_size as usize) };
        loop {
            unsafe { SetEvent(h_ack) };
            let wait = unsafe { WaitForSingleObject(h_rdy, 100) };

            if log_atomic.load(std::sync::atomic::Ordering::Acquire) != 0 {
                break;
            }
            if wait == WAIT_OBJECT_0 {
                let log_pid = unsafe { *(mmf as *const c_uint) };
                if pid == log_pid {
                    let log_ptr = (mmf as isize + 4) as *const c_char;
                    let log_msg = unsafe { std::ffi::CStr::from_ptr(log_ptr) };
                    log::debug!("D3D: {}", log_msg.to_string_lossy().trim_end());
                }
            }
        }
        unsafe {
            UnmapViewOfFile(mmf);
            CloseHandle(fh);
            CloseHandle(h_ack);
            CloseHandle(h_rdy);
        }
        log::debug!("D3D log thread finished");
    })
}

pub fn parse_use_warp<I: IntoIterator<Item = String>>(args: I) -> bool {
    args.into_iter()
        .any(|arg| arg.eq_ignore_ascii_case("-warp") || arg.eq_ignore_ascii_case("/warp"))
}

#[repr(C)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

/// Clip space positions. A resize only recreates the swapchain, so the
/// triangle stretches with the window.
pub fn triangle_vertices() -> [Vertex; 3] {
    [
        Vertex { position: [0.0, 0.5, 0.0], color: [1.0, 0.0, 0.0, 1.0] },
        Vertex { position: [0.5, -0.5, 0.0], color: [0.0, 1.0, 0.0, 1.0] },
        Vertex { position: [-0.5, -0.5, 0.0], color: [0.0, 0.0, 1.0, 1.0] },
    ]
}

pub struct D3D {
    pub dxgi_factory: IDXGIFactory5,
    pub device: ID3D12Device,
    hwnd: HWND,
    rtv_stride: usize,
    cmd_alloc: [ID3D12CommandAllocator; BUFFER_COUNT as usize],
    cmd_queue: ID3D12CommandQueue,
    swap_chain: IDXGISwapChain3,
    cmd_list: ID3D12GraphicsCommandList,
    frame_count: u64,
    fence: ID3D12Fence,
    swap_chain_tex: Option<[ID3D12Resource; BUFFER_COUNT as usize]>,
    swap_chain_heap: ID3D12DescriptorHeap,
    width: u32,
    height: u32,
    resource: Resource,
}

struct Resource {
    rootsig: ID3D12RootSignature,
    pso: ID3D12PipelineState,
    // nothing reads this again, but it owns the GPU allocation the view points at
    #[allow(dead_code)]
    vertex_buffer: ID3D12Resource,
    vb_view: D3D12_VERTEX_BUFFER_VIEW,
}

/// The refcount is not touched; the caller keeps the resource alive for the
/// duration of the recorded command list.
pub fn transition_barrier(
    resource: &ID3D12Resource,
    state_before: D3D12_RESOURCE_STATES,
    state_after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: std::mem::ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: Some(unsafe { std::mem::transmute_copy(resource) }),
                StateBefore: state_before,
                StateAfter: state_after,
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
            }),
        },
    }
}

fn compile_shader(entry: &[u8], target: &[u8]) -> ID3DBlob {
    let compile_flags = if cfg!(debug_assertions) {
        D3DCOMPILE_DEBUG | D3DCOMPILE_SKIP_OPTIMIZATION
    } else {
        0
    };
    let mut code: Option<ID3DBlob> = None;
    let mut err: Option<ID3DBlob> = None;
    let result = unsafe {
        D3DCompile(
            SHADER_SOURCE.as_ptr() as *const c_void,
            SHADER_SOURCE.len(),
            PCSTR(b"hello_triangle.hlsl\0".as_ptr()),
            None,
            None,
            PCSTR(entry.as_ptr()),
            PCSTR(target.as_ptr()),
            compile_flags,
            0,
            &mut code,
            Some(&mut err),
        )
    };
    if let Err(e) = result {
        let msg = err
            .map(|blob| unsafe {
                String::from_utf8_lossy(std::slice::from_raw_parts(
                    blob.GetBufferPointer() as *const u8,
                    blob.GetBufferSize(),
                ))
                .into_owned()
            })
            .unwrap_or_default();
        panic!("Shader compilation failed: {} {}", e, msg);
    }
    code.unwrap()
}

fn create_resources(device: &ID3D12Device) -> Resource {
    // The shaders read nothing but the vertex stream, so the root signature
    // has no parameters
    let rootsig: ID3D12RootSignature = {
        let root_desc = D3D12_ROOT_SIGNATURE_DESC {
            NumParameters: 0,
            pParameters: std::ptr::null(),
            NumStaticSamplers: 0,
            pStaticSamplers: std::ptr::null(),
            Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
        };
        let mut root_sig_blob: Option<ID3DBlob> = None;
        let mut err: Option<ID3DBlob> = None;
        unsafe { D3D12SerializeRootSignature(&root_desc, D3D_ROOT_SIGNATURE_VERSION_1_0, &mut root_sig_blob, Some(&mut err)) }.unwrap();
        let root_sig_blob = root_sig_blob.unwrap();
        let ary = unsafe { std::ptr::slice_from_raw_parts(root_sig_blob.GetBufferPointer() as *const u8, root_sig_blob.GetBufferSize()) };
        unsafe { device.CreateRootSignature(0, &*ary) }.unwrap()
    };

    // Both stages come out of the one shader source
    let vs = compile_shader(b"VSMain\0", b"vs_5_0\0");
    let ps = compile_shader(b"PSMain\0", b"ps_5_0\0");

    let pso: ID3D12PipelineState = {
        let ie_desc = [
            D3D12_INPUT_ELEMENT_DESC{
                SemanticName: PCSTR("POSITION\0".as_ptr()),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32B32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: 0,
                InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
            D3D12_INPUT_ELEMENT_DESC{
                SemanticName: PCSTR("COLOR\0".as_ptr()),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32B32A32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: 12,
                InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
        ];
        let mut rs_desc: D3D12_RASTERIZER_DESC = unsafe { std::mem::zeroed() };
        rs_desc.CullMode = D3D12_CULL_MODE_NONE;
        rs_desc.FillMode = D3D12_FILL_MODE_SOLID;
        rs_desc.DepthClipEnable = BOOL(1);
        let ds_desc: D3D12_DEPTH_STENCIL_DESC = unsafe { std::mem::zeroed() };
        let mut bs_desc: D3D12_BLEND_DESC = unsafe { std::mem::zeroed() };
        bs_desc.RenderTarget[0].RenderTargetWriteMask = 0b1111;

        let mut pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            pRootSignature: Some(rootsig.clone()),
            VS: unsafe { D3D12_SHADER_BYTECODE{
                pShaderBytecode: vs.GetBufferPointer(),
                BytecodeLength: vs.GetBufferSize()}
            },
            PS: unsafe { D3D12_SHADER_BYTECODE{
                pShaderBytecode: ps.GetBufferPointer(),
                BytecodeLength: ps.GetBufferSize()}
            },
            DS: unsafe{ std::mem::zeroed() },
            HS: unsafe{ std::mem::zeroed() },
            GS: unsafe{ std::mem::zeroed() },
            InputLayout: D3D12_INPUT_LAYOUT_DESC{
                pInputElementDescs: ie_desc.as_ptr(),
                NumElements: ie_desc.len().try_into().unwrap(),
            },
            IBStripCutValue: D3D12_INDEX_BUFFER_STRIP_CUT_VALUE_DISABLED,
            PrimitiveTopologyType: D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
            RasterizerState: rs_desc,
            DepthStencilState: ds_desc,
            BlendState: bs_desc,
            SampleMask: u32::MAX,
            NumRenderTargets: 1,
            RTVFormats: [DXGI_FORMAT_UNKNOWN; 8],
            DSVFormat: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC{ Count: 1, Quality: 0 },
            StreamOutput: unsafe{ std::mem::zeroed() },
            NodeMask: 0,
            CachedPSO: unsafe{ std::mem::zeroed() },
            Flags: D3D12_PIPELINE_STATE_FLAG_NONE,
        };
        pso_desc.RTVFormats[0] = DXGI_FORMAT_R8G8B8A8_UNORM;
        unsafe { device.CreateGraphicsPipelineState(&pso_desc) }.unwrap()
    };

    // Three vertices, written once. An upload heap is fine for this little data.
    let vertices = triangle_vertices();
    let vb_size = std::mem::size_of_val(&vertices);

    let vertex_buffer: ID3D12Resource = {
        let mut desc: D3D12_RESOURCE_DESC = unsafe { std::mem::zeroed() };
        desc.Dimension = D3D12_RESOURCE_DIMENSION_BUFFER;
        desc.Width = vb_size.try_into().unwrap();
        desc.Height = 1;
        desc.DepthOrArraySize = 1;
        desc.MipLevels = 1;
        desc.SampleDesc.Count = 1;
        desc.Layout = D3D12_TEXTURE_LAYOUT_ROW_MAJOR;
        let mut heap: D3D12_HEAP_PROPERTIES = unsafe { std::mem::zeroed() };
        heap.Type = D3D12_HEAP_TYPE_UPLOAD;
        let mut res: Option<ID3D12Resource> = None;
        unsafe { device.CreateCommittedResource(&heap, D3D12_HEAP_FLAG_NONE, &desc, D3D12_RESOURCE_STATE_GENERIC_READ, None, &mut res) }.unwrap();
        res.unwrap()
    };
    let vb_view = D3D12_VERTEX_BUFFER_VIEW {
        BufferLocation: unsafe { vertex_buffer.GetGPUVirtualAddress() },
        SizeInBytes: vb_size.try_into().unwrap(),
        StrideInBytes: std::mem::size_of::<Vertex>() as u32,
    };

    let mut p: *mut c_void = std::ptr::null_mut();
    unsafe { vertex_buffer.Map(0, None, Some(&mut p)) }.unwrap();
    unsafe { libc::memcpy(p, vertices.as_ptr() as _, vb_size) };
    unsafe { vertex_buffer.Unmap(0, None) };

    Resource { rootsig, pso, vertex_buffer, vb_view }
}

impl Drop for D3D {
    fn drop(&mut self) {
        self.frame_count += 1;
        // Wait for GPU command completion
        unsafe {
            self.cmd_queue.Signal(&self.fence, self.frame_count).unwrap();
            self.fence.SetEventOnCompletion(self.frame_count, None).unwrap();
            self.device.GetDeviceRemovedReason().unwrap();
        }
    }
}

impl D3D {
    pub fn new(width: u32, height: u32, hwnd: HWND, is_sw: bool) -> Self {

        let factory_flags = if cfg!(debug_assertions) { DXGI_CREATE_FACTORY_DEBUG } else { 0 };
        let factory: IDXGIFactory5 = unsafe { CreateDXGIFactory2(factory_flags) }.unwrap();

        if cfg!(debug_assertions) {
            let mut debug: Option<ID3D12Debug> = None;
            unsafe {
                match D3D12GetDebugInterface(&mut debug) {
                    Ok(_) => {
                        debug.as_ref().unwrap().EnableDebugLayer();
                        log::info!("D3D12 debug layer enabled");
                    },
                    _ => { log::warn!("Cannot enable debug layer. Maybe developer mode is disabled.") },
                }
            }
            let mut debug: Option<ID3D12Debug1> = None;
            unsafe {
                match D3D12GetDebugInterface(&mut debug) {
                    Ok(_) => {
                        debug.as_ref().unwrap().SetEnableGPUBasedValidation(BOOL(1));
                        debug.as_ref().unwrap().SetEnableSynchronizedCommandQueueValidation(BOOL(1));
                        log::info!("GPU based validation enabled");
                    },
                    _ => { log::warn!("Cannot get ID3D12Debug1 interface.") },
                }
            }
        }

        let adapter: IDXGIAdapter4 = {
            let mut adapter: Option<IDXGIAdapter4> = None;
            if is_sw {
                adapter = unsafe { factory.EnumWarpAdapter() }.ok();
            }
            if adapter.is_none() {
                adapter = unsafe { factory.EnumAdapters1(0).and_then(|a| a.cast::<IDXGIAdapter4>()) }.ok();
            }
            adapter.unwrap()
        };
        let adapter_desc = unsafe { adapter.GetDesc3() }.unwrap();
        log::info!("Adapter: {}", String::from_utf16_lossy(adapter_desc.Description.split(|n| n == &0).next().unwrap()));
        let device: ID3D12Device = {
            let mut device_ptr: Option<ID3D12Device> = None;
            unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_12_0, &mut device_ptr) }.unwrap();
            device_ptr.unwrap()
        };
        let rtv_stride = unsafe { device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV) } as usize;

        let cmd_alloc: [_; BUFFER_COUNT as usize] =
            array_init::try_array_init(|_: usize| -> Result<ID3D12CommandAllocator> {
                let r = unsafe { device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }?;
                Ok(r)
            }).unwrap();
        let cmd_queue: ID3D12CommandQueue = unsafe {
            let desc = D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT, ..Default::default()
            };
            device.CreateCommandQueue(&desc)
        }.unwrap();

        let swap_chain : IDXGISwapChain3 = unsafe {
            let desc = DXGI_SWAP_CHAIN_DESC1 {
                BufferCount: BUFFER_COUNT,
                Width: width,
                Height: height,
                Format: DXGI_FORMAT_R8G8B8A8_UNORM,
                BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
                SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    ..Default::default()
                },
                ..Default::default()
            };
            factory.CreateSwapChainForHwnd(&cmd_queue, hwnd, &desc, None, None)
        }.unwrap().cast().unwrap();

        let cmd_list: ID3D12GraphicsCommandList = unsafe {
            device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &cmd_alloc[0], None)
        }.unwrap();
        unsafe { cmd_list.Close() }.unwrap();

        let fence: ID3D12Fence = unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }.unwrap();

        let swap_chain_heap: ID3D12DescriptorHeap = unsafe {
            let desc = D3D12_DESCRIPTOR_HEAP_DESC {
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
                NumDescriptors: BUFFER_COUNT,
                ..Default::default()
            };
            device.CreateDescriptorHeap(&desc)
        }.unwrap();
        let swap_chain_tex: [_; BUFFER_COUNT as usize] =
            array_init::try_array_init(|i| -> Result<ID3D12Resource> {
                let r = unsafe { swap_chain.GetBuffer(i as u32) }?;
                Ok(r)
            }).unwrap();
        let h_rtv = unsafe { swap_chain_heap.GetCPUDescriptorHandleForHeapStart() };
        for i in swap_chain_tex.iter().enumerate() {
            let desc = D3D12_CPU_DESCRIPTOR_HANDLE{
                ptr: h_rtv.ptr + i.0 * rtv_stride
            };
            unsafe { device.CreateRenderTargetView(i.1, None, desc) };
        }

        let resource = create_resources(&device);

        D3D{
            dxgi_factory: factory,
            device,
            hwnd,
            rtv_stride,
            cmd_alloc,
            cmd_queue,
            swap_chain,
            cmd_list,
            frame_count: 0,
            fence,
            swap_chain_tex: Some(swap_chain_tex),
            swap_chain_heap,
            width,
            height,
            resource,
        }
    }

    fn resize_buffers(&mut self, width: u32, height: u32) -> Result<()> {
        log::info!("Client area changed. {}x{} -> {}x{}", self.width, self.height, width, height);
        // Every back buffer reference must be gone before ResizeBuffers,
        // including the ones held by in-flight GPU work
        self.frame_count += 1;
        unsafe { self.cmd_queue.Signal(&self.fence, self.frame_count) }?;
        unsafe { self.fence.SetEventOnCompletion(self.frame_count, None) }?;
        self.swap_chain_tex = None;

        let desc = unsafe { self.swap_chain.GetDesc1() }?;
        unsafe { self.swap_chain.ResizeBuffers(
            desc.BufferCount, width, height, desc.Format, 0)
        }?;
        let swap_chain_tex: [_; BUFFER_COUNT as usize] =
            array_init::try_array_init(|i| -> Result<ID3D12Resource> {
                let r = unsafe { self.swap_chain.GetBuffer(i as u32) }?;
                Ok(r)
            })?;
        let h_rtv = unsafe { self.swap_chain_heap.GetCPUDescriptorHandleForHeapStart() };
        for i in swap_chain_tex.iter().enumerate() {
            let desc = D3D12_CPU_DESCRIPTOR_HANDLE{
                ptr: h_rtv.ptr + i.0 * self.rtv_stride
            };
            unsafe { self.device.CreateRenderTargetView(i.1, None, desc) };
        }
        self.swap_chain_tex = Some(swap_chain_tex);
        self.width = width;
        self.height = height;
        Ok(())
    }
}

impl D3DBase for D3D {
    fn draw(&mut self) {
        self.frame_count += 1;
        let frame_index = unsafe { self.swap_chain.GetCurrentBackBufferIndex() };

        let cmd_alloc = &self.cmd_alloc[self.frame_count as usize % BUFFER_COUNT as usize];
        unsafe { cmd_alloc.Reset() }.unwrap();
        unsafe { self.cmd_list.Reset(cmd_alloc, None) }.unwrap();

        let swap_chain_tex = &(self.swap_chain_tex.as_ref().unwrap())[frame_index as usize];
        unsafe { self.cmd_list.ResourceBarrier(&[transition_barrier(swap_chain_tex,
            D3D12_RESOURCE_STATE_COMMON, D3D12_RESOURCE_STATE_RENDER_TARGET)]) };

        let h_rtv = unsafe { self.swap_chain_heap.GetCPUDescriptorHandleForHeapStart() };
        let rtv_swapchain = D3D12_CPU_DESCRIPTOR_HANDLE{
            ptr: h_rtv.ptr + frame_index as usize * self.rtv_stride
        };
        unsafe { self.cmd_list.ClearRenderTargetView(rtv_swapchain, DEFAULT_RT_CLEAR_COLOR.as_ptr(), &[]) };

        unsafe { self.cmd_list.SetPipelineState(&self.resource.pso) };
        unsafe { self.cmd_list.SetGraphicsRootSignature(&self.resource.rootsig) };
        unsafe { self.cmd_list.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST) };
        unsafe { self.cmd_list.IASetVertexBuffers(0, Some(&[self.resource.vb_view])) };
        let rect = RECT {
            left: 0, top: 0, right: self.width as i32, bottom: self.height as i32
        };
        unsafe { self.cmd_list.RSSetScissorRects(&[rect]) };
        let viewport = D3D12_VIEWPORT {
            Width: self.width as f32, Height: self.height as f32, MaxDepth: 1.0f32, ..Default::default()
        };
        unsafe { self.cmd_list.RSSetViewports(&[viewport]) };
        unsafe { self.cmd_list.OMSetRenderTargets(1, Some(&rtv_swapchain), BOOL(0), None) };
        unsafe { self.cmd_list.DrawInstanced(3, 1, 0, 0) };

        unsafe { self.cmd_list.ResourceBarrier(&[transition_barrier(swap_chain_tex,
            D3D12_RESOURCE_STATE_RENDER_TARGET, D3D12_RESOURCE_STATE_COMMON)]) };

        unsafe { self.cmd_list.Close() }.unwrap();

        let cmds = [Some(ID3D12CommandList::from(&self.cmd_list))];
        unsafe { self.cmd_queue.ExecuteCommandLists(&cmds) };
        unsafe { self.cmd_queue.Signal(&self.fence, self.frame_count) }.unwrap();
    }

    fn present(&mut self) -> Result<()> {
        let param: DXGI_PRESENT_PARAMETERS = Default::default();
        unsafe { self.swap_chain.Present1(1, 0, &param) }.unwrap();
        Ok(())
    }

    fn wait(&mut self) -> Result<()> {
        if self.frame_count != 0 {
            unsafe { self.fence.SetEventOnCompletion(self.frame_count - 1, None) }?;
        }
        // Recreate the swapchain buffers when the client area changed since
        // the last frame. A minimized window reports an empty rect and keeps
        // the old buffers.
        let mut rect = RECT::default();
        unsafe { GetClientRect(self.hwnd, &mut rect) };
        let width = (rect.right - rect.left) as u32;
        let height = (rect.bottom - rect.top) as u32;
        if width != 0 && height != 0 && (width != self.width || height != self.height) {
            self.resize_buffers(width, height)?;
        }
        Ok(())
    }

    fn get_image(&mut self) -> (&ID3D12CommandQueue, &ID3D12Resource)
    {
        let r = self.swap_chain_tex.as_ref().unwrap();
        (&self.cmd_queue, &r[0])
    }
}

extern "system" fn wndproc(
    window: HWND, message: u32, wparam: WPARAM, lparam: LPARAM, ) -> LRESULT {
    match message {
        WM_DESTROY => {
            unsafe { PostQuitMessage(0) };
            LRESULT::default()
        }
        _ => {
            unsafe { DefWindowProcW(window, message, wparam, lparam) }
        }
    }
}

pub fn setup_window(width: u32, height: u32) -> HWND {
    let class_name = "TriangleWindowClass\0".encode_utf16().collect::<Vec<u16>>();

    let wcex = WNDCLASSEXW {
        cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
        style: CS_HREDRAW | CS_VREDRAW,
        lpfnWndProc: Some(wndproc),
        hInstance: unsafe { GetModuleHandleW(None).unwrap() },
        hCursor: unsafe { LoadCursorW(None, IDC_ARROW).unwrap() },
        lpszClassName: PCWSTR(class_name.as_ptr()),
        ..Default::default()
    };
    assert_ne!(unsafe { RegisterClassExW(&wcex) }, 0);

    let mut rect = RECT {
        left: 0, top: 0, right: width as i32, bottom: height as i32
    };
    unsafe{ AdjustWindowRect(&mut rect, WS_OVERLAPPEDWINDOW, false) };

    let window_width = rect.right - rect.left;
    let window_height: i32 = rect.bottom - rect.top;

    let hwnd = unsafe { CreateWindowExW(
        Default::default(),
        PCWSTR(class_name.as_ptr()),
        PCWSTR("Hello Triangle\0".encode_utf16().collect::<Vec<u16>>().as_ptr()),
        WS_OVERLAPPEDWINDOW, CW_USEDEFAULT, 0, window_width, window_height,
        None, None, None, None
    ) };
    assert_ne!(hwnd.0, 0);

    unsafe { ShowWindow(hwnd, SW_SHOW) };

    hwnd
}

pub fn default_main(width: u32, height: u32) -> Result<()> {
    let use_warp = parse_use_warp(std::env::args());

    let dbg_atomic = Arc::new(AtomicUsize::new(0));
    let mut dbg_thread: Option<std::thread::JoinHandle<()>> = None;
    if cfg!(debug_assertions) {
        dbg_thread = Some(spawn_d3d_log_thread(dbg_atomic.clone()));
    }

    let mut debug_device: Option<ID3D12DebugDevice> = None;
    let mut msg = MSG::default();
    {
        let main_window_handle = setup_window(width, height);
        let mut d3d = D3D::new(width, height, main_window_handle, use_warp);
        if cfg!(debug_assertions) {
            debug_device = d3d.device.cast::<ID3D12DebugDevice>().ok();
        }

        loop {
            if msg.message == WM_QUIT {
                break;
            }
            if unsafe { PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE) }.into() {
                unsafe { DispatchMessageW(&msg) };
            }
            else {
                d3d.wait().unwrap();
                d3d.draw();
                d3d.present().unwrap();
            }
        }
    }
    unsafe {
        if let Some(d) = debug_device {
            // The device itself is still alive here, everything else must be gone
            d.ReportLiveDeviceObjects(D3D12_RLDO_IGNORE_INTERNAL).unwrap();
        }
    }

    if let Some(x) = dbg_thread {
        // Exit log thread
        dbg_atomic.store(1, std::sync::atomic::Ordering::Release);
        x.join().unwrap();
    }

    match msg.wParam.0 {
        0 => Ok(()),
        _ => panic!("wParam {}", msg.wParam.0)
    }
}
