pub mod hello_triangle;

#[cfg(test)]
mod tests {

    const WINDOW_WIDTH: u32 = 640;
    const WINDOW_HEIGHT: u32 = 360;

    use windows::{
        Win32::Graphics::Direct3D12::*, Win32::UI::WindowsAndMessaging::*,
        Win32::Graphics::Dxgi::Common::*,
    };
    use std::sync::{Arc, atomic::AtomicUsize};
    use libc::*;
    use crate::hello_triangle::*;

    #[test]
    fn vertex_layout() {
        // must match the POSITION/COLOR input elements of the pipeline
        assert_eq!(std::mem::size_of::<Vertex>(), 28);

        let verts = triangle_vertices();
        assert_eq!(verts.len(), 3);
        assert_eq!(verts[0].color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(verts[1].color, [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(verts[2].color, [0.0, 0.0, 1.0, 1.0]);
        for v in &verts {
            assert!(v.position[0].abs() <= 1.0);
            assert!(v.position[1].abs() <= 1.0);
            assert_eq!(v.position[2], 0.0);
        }
    }

    #[test]
    fn warp_flag() {
        assert!(parse_use_warp(vec!["hello_triangle.exe".to_string(), "-warp".to_string()]));
        assert!(parse_use_warp(vec!["/WARP".to_string()]));
        assert!(!parse_use_warp(vec!["hello_triangle.exe".to_string()]));
        assert!(!parse_use_warp(Vec::new()));
    }

    #[test]
    fn alignment() {
        assert_eq!(crate::align!(0, 256), 0);
        assert_eq!(crate::align!(1, 256), 256);
        assert_eq!(crate::align!(256, 256), 256);
        assert_eq!(crate::align!(257, 256), 512);
        assert_eq!(crate::align!(2560, 256), 2560);
    }

    #[test]
    fn test_draw() {
        let dbg_atomic = Arc::new(AtomicUsize::new(0));
        let mut dbg_thread: Option<std::thread::JoinHandle<()>> = None;
        if cfg!(debug_assertions) {
            dbg_thread = Some(spawn_d3d_log_thread(dbg_atomic.clone()));
        }

        let mut pixels = Vec::new();
        let mut msg = MSG::default();
        {
            let main_window_handle = setup_window(WINDOW_WIDTH, WINDOW_HEIGHT);
            let mut d3d = D3D::new(WINDOW_WIDTH, WINDOW_HEIGHT, main_window_handle, true);

            loop {
                if msg.message == WM_QUIT {
                    break;
                }
                if unsafe { PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE) }.into() {
                    unsafe { DispatchMessageW(&msg) };
                }
                else {
                    for _ in 0..20 {
                        d3d.wait().unwrap();
                        d3d.draw();
                        d3d.present().unwrap();
                    }
                    let img = d3d.get_image();
                    pixels = read_back_pixels(img.0, img.1);
                    unsafe { PostQuitMessage(0) };
                }
            }
        }
        if let Some(x) = dbg_thread {
            dbg_atomic.store(1, std::sync::atomic::Ordering::Release);
            x.join().unwrap();
        }

        let w = WINDOW_WIDTH as usize;
        let h = WINDOW_HEIGHT as usize;
        assert_eq!(pixels.len(), w * h);

        // Corners lie outside the triangle: the clear color (0.0, 0.2, 0.4, 1.0) as UNORM
        let clear = [0u8, 51, 102, 255];
        assert_eq!(pixels[0], clear);
        assert_eq!(pixels[w - 1], clear);
        assert_eq!(pixels[(h - 1) * w], clear);
        assert_eq!(pixels[h * w - 1], clear);

        // The window center lies inside the triangle. The vertex colors are the
        // three unit channels, so the interpolated channels sum to one.
        let center = pixels[(h / 2) * w + w / 2];
        assert_ne!(center, clear);
        assert_eq!(center[3], 255);
        let sum = center[0] as u32 + center[1] as u32 + center[2] as u32;
        assert!((253..=257).contains(&sum), "center pixel {:?}", center);
    }

    fn read_back_pixels(cmd_queue: &ID3D12CommandQueue, image: &ID3D12Resource) -> Vec<[u8; 4]> {
        let mut device = None as Option<ID3D12Device>;
        unsafe { cmd_queue.GetDevice(&mut device) }.unwrap();
        let device = device.unwrap();
        let res_desc = unsafe { image.GetDesc() };
        assert_eq!(res_desc.DepthOrArraySize, 1);
        assert_eq!(res_desc.MipLevels, 1);
        assert_eq!(res_desc.Format, DXGI_FORMAT_R8G8B8A8_UNORM);
        let mut res: Option<ID3D12Resource> = None;
        let mut layout = D3D12_PLACED_SUBRESOURCE_FOOTPRINT{ ..Default::default() };
        {
            // A buffer in a readback heap the image can be copied into
            let mut desc = res_desc;
            desc.Layout = D3D12_TEXTURE_LAYOUT_ROW_MAJOR;
            desc.Flags = D3D12_RESOURCE_FLAG_NONE;
            let mut heap_prop = D3D12_HEAP_PROPERTIES{ ..Default::default() };
            let mut total_size = 0u64;
            unsafe { device.GetCopyableFootprints(&desc, 0, 1, 0, Some(&mut layout), None, None, Some(&mut total_size)) };
            assert_ne!(total_size, 0);
            assert_eq!(layout.Footprint.RowPitch as usize, crate::align!(4 * res_desc.Width, D3D12_TEXTURE_DATA_PITCH_ALIGNMENT));
            desc.Dimension = D3D12_RESOURCE_DIMENSION_BUFFER;
            desc.Format = DXGI_FORMAT_UNKNOWN;
            desc.Width = total_size;
            desc.Height = 1;
            heap_prop.Type = D3D12_HEAP_TYPE_READBACK;
            unsafe { device.CreateCommittedResource(&heap_prop, D3D12_HEAP_FLAG_NONE, &desc, D3D12_RESOURCE_STATE_COPY_DEST, None, &mut res) }.unwrap();
        }
        let res = &res.unwrap();
        {
            // Copy the image into it
            let cmd_alloc = unsafe { device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }.unwrap();
            let cmd_list: ID3D12GraphicsCommandList = unsafe { device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &cmd_alloc, None) }.unwrap();
            unsafe { cmd_list.ResourceBarrier(&[transition_barrier(image,
                D3D12_RESOURCE_STATE_COMMON, D3D12_RESOURCE_STATE_COPY_SOURCE)]) };
            let src = D3D12_TEXTURE_COPY_LOCATION {
                pResource: Some(image.clone()),
                Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
                Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                    SubresourceIndex: 0
                }
            };
            let dest = D3D12_TEXTURE_COPY_LOCATION {
                pResource: Some(res.clone()),
                Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
                Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                    PlacedFootprint: layout
                }
            };
            unsafe { cmd_list.CopyTextureRegion(&dest, 0, 0, 0, &src, None) };
            unsafe { cmd_list.Close() }.unwrap();
            let cmds = [Some(ID3D12CommandList::from(&cmd_list))];
            unsafe { cmd_queue.ExecuteCommandLists(&cmds) };
            let fence: ID3D12Fence = unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }.unwrap();
            unsafe { cmd_queue.Signal(&fence, 1) }.unwrap();
            unsafe { fence.SetEventOnCompletion(1, None) }.unwrap();
        }
        let mut pixels = Vec::with_capacity(res_desc.Width as usize * res_desc.Height as usize);
        {
            let row_pitch = layout.Footprint.RowPitch as isize;
            let mut p = 0 as *mut c_void;
            unsafe { res.Map(0, None, Some(&mut p)) }.unwrap();
            for y in 0..res_desc.Height as isize {
                for x in 0..res_desc.Width as isize {
                    let pt = (p as isize + y * row_pitch + x * 4) as *const c_uint;
                    pixels.push(unsafe { *pt }.to_le_bytes());
                }
            }
            unsafe { res.Unmap(0, None) };
        }
        pixels
    }

}
