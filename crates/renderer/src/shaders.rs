//! Built-in shader sources.

/// Passes the quad's clip-space positions straight through.
pub const VERTEX_SHADER: &str = r"attribute vec4 aVertexPosition;

void main(void) {
    gl_Position = aVertexPosition;
}
";

/// Shows the front feedback texture one texel per pixel.
pub const DISPLAY_SHADER: &str = r"precision highp float;

uniform sampler2D uTexture;
uniform vec2 uResolution;

void main() {
    gl_FragColor = texture2D(uTexture, gl_FragCoord.xy / uResolution);
}
";

/// Simulation used when no fragment shader is supplied: an orbiting spot
/// leaving fading trails.
pub const DEMO_SIMULATION: &str = r"precision highp float;

uniform sampler2D uTexture;
uniform vec2 uResolution;
uniform float uTime;

void main() {
    vec2 uv = gl_FragCoord.xy / uResolution;
    vec4 previous = texture2D(uTexture, uv);
    vec2 center = vec2(0.5) + 0.35 * vec2(cos(uTime), sin(uTime * 1.3));
    float spot = 1.0 - smoothstep(0.0, 0.03, distance(uv, center));
    gl_FragColor = vec4(previous.rgb * 0.97 + spot * vec3(0.9, 0.5, 0.2), 1.0);
}
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glsl::compile_program;

    #[test]
    fn built_in_programs_compile_and_link() {
        compile_program(VERTEX_SHADER, DISPLAY_SHADER).expect("display program");
        compile_program(VERTEX_SHADER, DEMO_SIMULATION).expect("demo program");
    }
}
