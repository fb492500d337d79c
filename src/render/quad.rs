// SPDX-License-Identifier: MPL-2.0

//! Textured full-viewport quad used by every blit.

use glow::HasContext;

use super::GpuError;

/// Interleaved `x, y, u, v` for a triangle strip covering clip space.
const VERTICES: [f32; 16] = [
    -1.0, -1.0, 0.0, 0.0, //
    1.0, -1.0, 1.0, 0.0, //
    -1.0, 1.0, 0.0, 1.0, //
    1.0, 1.0, 1.0, 1.0,
];

/// GLSL dialect matching the context version that was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderDialect {
    Core330,
    Glsl130,
    Glsl120,
}

impl ShaderDialect {
    pub fn for_version(major: u32, minor: u32) -> Self {
        match (major, minor) {
            (major, _) if major > 3 => ShaderDialect::Core330,
            (3, minor) if minor >= 3 => ShaderDialect::Core330,
            (3, _) => ShaderDialect::Glsl130,
            _ => ShaderDialect::Glsl120,
        }
    }

    fn vertex_source(self) -> String {
        let body = "
uniform float u_flip;
IN vec2 a_position;
IN vec2 a_texcoord;
OUT vec2 v_texcoord;
void main() {
    v_texcoord = vec2(a_texcoord.x, mix(a_texcoord.y, 1.0 - a_texcoord.y, u_flip));
    gl_Position = vec4(a_position, 0.0, 1.0);
}
";
        match self {
            ShaderDialect::Glsl120 => format!(
                "#version 120\n{}",
                body.replace("IN ", "attribute ")
                    .replace("OUT ", "varying ")
            ),
            dialect => format!(
                "{}\n{}",
                dialect.header(),
                body.replace("IN ", "in ").replace("OUT ", "out ")
            ),
        }
    }

    fn fragment_source(self) -> String {
        match self {
            ShaderDialect::Glsl120 => "#version 120
uniform sampler2D u_texture;
varying vec2 v_texcoord;
void main() {
    gl_FragColor = texture2D(u_texture, v_texcoord);
}
"
            .to_owned(),
            dialect => format!(
                "{}
uniform sampler2D u_texture;
in vec2 v_texcoord;
out vec4 frag_color;
void main() {{
    frag_color = texture(u_texture, v_texcoord);
}}
",
                dialect.header()
            ),
        }
    }

    fn header(self) -> &'static str {
        match self {
            ShaderDialect::Core330 => "#version 330 core",
            ShaderDialect::Glsl130 => "#version 130",
            ShaderDialect::Glsl120 => "#version 120",
        }
    }
}

/// Shader program plus geometry for drawing one texture over the viewport.
///
/// Built once with the context and released with [`QuadProgram::destroy`]
/// before the context goes away.
pub struct QuadProgram {
    program: glow::NativeProgram,
    vao: Option<glow::NativeVertexArray>,
    vbo: glow::NativeBuffer,
    flip: Option<glow::NativeUniformLocation>,
    position: u32,
    texcoord: u32,
}

impl QuadProgram {
    /// # Safety
    ///
    /// The context owning `gl` must be current on this thread.
    pub unsafe fn new(gl: &glow::Context, dialect: ShaderDialect) -> Result<Self, GpuError> {
        unsafe {
            let program =
                compile_program(gl, &dialect.vertex_source(), &dialect.fragment_source())?;

            let position = gl.get_attrib_location(program, "a_position").unwrap_or(0);
            let texcoord = gl.get_attrib_location(program, "a_texcoord").unwrap_or(1);
            let flip = gl.get_uniform_location(program, "u_flip");

            gl.use_program(Some(program));
            let sampler = gl.get_uniform_location(program, "u_texture");
            gl.uniform_1_i32(sampler.as_ref(), 0);
            gl.use_program(None);

            let vao = if dialect == ShaderDialect::Glsl120
                && !gl
                    .supported_extensions()
                    .contains("GL_ARB_vertex_array_object")
            {
                None
            } else {
                match gl.create_vertex_array() {
                    Ok(vao) => Some(vao),
                    Err(why) => {
                        gl.delete_program(program);
                        return Err(GpuError::Resource(why));
                    }
                }
            };

            let vbo = match gl.create_buffer() {
                Ok(vbo) => vbo,
                Err(why) => {
                    if let Some(vao) = vao {
                        gl.delete_vertex_array(vao);
                    }
                    gl.delete_program(program);
                    return Err(GpuError::Resource(why));
                }
            };

            let bytes: Vec<u8> = VERTICES.iter().flat_map(|v| v.to_ne_bytes()).collect();
            if vao.is_some() {
                gl.bind_vertex_array(vao);
            }
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, &bytes, glow::STATIC_DRAW);

            let quad = Self {
                program,
                vao,
                vbo,
                flip,
                position,
                texcoord,
            };
            quad.set_attributes(gl);

            if quad.vao.is_some() {
                gl.bind_vertex_array(None);
            }
            gl.bind_buffer(glow::ARRAY_BUFFER, None);

            Ok(quad)
        }
    }

    unsafe fn set_attributes(&self, gl: &glow::Context) {
        let stride = (4 * std::mem::size_of::<f32>()) as i32;
        unsafe {
            gl.enable_vertex_attrib_array(self.position);
            gl.vertex_attrib_pointer_f32(self.position, 2, glow::FLOAT, false, stride, 0);
            gl.enable_vertex_attrib_array(self.texcoord);
            gl.vertex_attrib_pointer_f32(self.texcoord, 2, glow::FLOAT, false, stride, 8);
        }
    }

    /// Draw `texture` over the current viewport. `flip_y` samples the first
    /// texture row at the top of the viewport.
    ///
    /// # Safety
    ///
    /// The context owning `gl` must be current on this thread.
    pub unsafe fn draw(&self, gl: &glow::Context, texture: glow::NativeTexture, flip_y: bool) {
        unsafe {
            gl.use_program(Some(self.program));
            gl.uniform_1_f32(self.flip.as_ref(), if flip_y { 1.0 } else { 0.0 });
            gl.active_texture(glow::TEXTURE0);
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));

            match self.vao {
                Some(vao) => gl.bind_vertex_array(Some(vao)),
                None => {
                    gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.vbo));
                    self.set_attributes(gl);
                }
            }

            gl.draw_arrays(glow::TRIANGLE_STRIP, 0, 4);

            if self.vao.is_some() {
                gl.bind_vertex_array(None);
            }
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            gl.bind_texture(glow::TEXTURE_2D, None);
            gl.use_program(None);
        }
    }

    /// # Safety
    ///
    /// The context owning `gl` must be current on this thread.
    pub unsafe fn destroy(self, gl: &glow::Context) {
        unsafe {
            gl.delete_buffer(self.vbo);
            if let Some(vao) = self.vao {
                gl.delete_vertex_array(vao);
            }
            gl.delete_program(self.program);
        }
    }
}

unsafe fn compile_program(
    gl: &glow::Context,
    vertex: &str,
    fragment: &str,
) -> Result<glow::NativeProgram, GpuError> {
    unsafe {
        let vs = gl
            .create_shader(glow::VERTEX_SHADER)
            .map_err(GpuError::Resource)?;
        gl.shader_source(vs, vertex);
        gl.compile_shader(vs);
        if !gl.get_shader_compile_status(vs) {
            let log = gl.get_shader_info_log(vs);
            gl.delete_shader(vs);
            return Err(GpuError::Shader(log));
        }

        let fs = match gl.create_shader(glow::FRAGMENT_SHADER) {
            Ok(fs) => fs,
            Err(why) => {
                gl.delete_shader(vs);
                return Err(GpuError::Resource(why));
            }
        };
        gl.shader_source(fs, fragment);
        gl.compile_shader(fs);
        if !gl.get_shader_compile_status(fs) {
            let log = gl.get_shader_info_log(fs);
            gl.delete_shader(vs);
            gl.delete_shader(fs);
            return Err(GpuError::Shader(log));
        }

        let program = match gl.create_program() {
            Ok(program) => program,
            Err(why) => {
                gl.delete_shader(vs);
                gl.delete_shader(fs);
                return Err(GpuError::Resource(why));
            }
        };
        gl.attach_shader(program, vs);
        gl.attach_shader(program, fs);
        gl.link_program(program);

        gl.detach_shader(program, vs);
        gl.detach_shader(program, fs);
        gl.delete_shader(vs);
        gl.delete_shader(fs);

        if !gl.get_program_link_status(program) {
            let log = gl.get_program_info_log(program);
            gl.delete_program(program);
            return Err(GpuError::Shader(log));
        }

        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_for_version() {
        assert_eq!(ShaderDialect::for_version(4, 6), ShaderDialect::Core330);
        assert_eq!(ShaderDialect::for_version(3, 3), ShaderDialect::Core330);
        assert_eq!(ShaderDialect::for_version(3, 0), ShaderDialect::Glsl130);
        assert_eq!(ShaderDialect::for_version(2, 1), ShaderDialect::Glsl120);
    }

    #[test]
    fn test_legacy_sources_use_attribute_syntax() {
        let vs = ShaderDialect::Glsl120.vertex_source();
        assert!(vs.starts_with("#version 120"));
        assert!(vs.contains("attribute vec2 a_position;"));
        assert!(vs.contains("varying vec2 v_texcoord;"));
        assert!(
            ShaderDialect::Glsl120
                .fragment_source()
                .contains("gl_FragColor")
        );
    }

    #[test]
    fn test_core_sources_use_in_out() {
        let vs = ShaderDialect::Core330.vertex_source();
        assert!(vs.starts_with("#version 330 core"));
        assert!(vs.contains("in vec2 a_texcoord;"));
        assert!(vs.contains("out vec2 v_texcoord;"));
        assert!(
            ShaderDialect::Glsl130
                .fragment_source()
                .contains("out vec4 frag_color;")
        );
    }
}
