use std::io::Cursor;

use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::WrapErr;

// SPIR-V produced by build.rs from the sources in shaders/.
const SCENE_VERT_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/scene.vert.spv"));
const SCENE_FRAG_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/scene.frag.spv"));

/// Decoded SPIR-V for the scene shaders, loaded once at renderer startup.
/// Pipeline recipes borrow these words; the cache hashes them structurally.
pub struct ShaderSet {
    pub scene_vert: Vec<u32>,
    pub scene_frag: Vec<u32>,
}

impl ShaderSet {
    pub fn load() -> Result<Self> {
        Ok(Self {
            scene_vert: read_words(SCENE_VERT_SPV)?,
            scene_frag: read_words(SCENE_FRAG_SPV)?,
        })
    }
}

/// The embedded bytes carry no alignment guarantee; `read_spv` re-packs them
/// into aligned words.
fn read_words(bytes: &[u8]) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes)).wrap_err("decoding embedded SPIR-V")
}

pub fn create_shader_module(device: &ash::Device, words: &[u32]) -> Result<vk::ShaderModule> {
    let info = vk::ShaderModuleCreateInfo::default().code(words);
    unsafe {
        device
            .create_shader_module(&info, None)
            .wrap_err("vkCreateShaderModule failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn embedded_shaders_decode_to_spirv() {
        let shaders = ShaderSet::load().unwrap();
        assert_eq!(shaders.scene_vert[0], SPIRV_MAGIC);
        assert_eq!(shaders.scene_frag[0], SPIRV_MAGIC);
        assert!(shaders.scene_vert.len() > 5);
        assert!(shaders.scene_frag.len() > 5);
    }
}
