//! GLSL preparation, reflection and validation.
//!
//! Authors write plain GLSL with loose declarations, either WebGL style
//!
//! ```glsl
//! attribute vec4 aVertexPosition;
//! uniform vec2 uResolution;
//! uniform sampler2D uTexture;
//! ```
//!
//! or with Vulkan-style `in`/`out` and explicit locations. Loose value
//! uniforms cannot exist in Vulkan GLSL, so [`prepare_program`] rewrites both
//! stages around a shared prologue:
//!
//! 1. Strip `#version` and `precision` lines and the loose `uniform`
//!    declarations. Lines are blanked, never removed, and diagnostics are
//!    reported relative to the first author line.
//! 2. Lift float/vec2 uniforms into one std140 block at set 0 and every
//!    `sampler2D` into a texture + sampler pair at set 1, aliased back to the
//!    author's names with `#define`.
//! 3. Give every attribute and varying an explicit location. Fragment inputs
//!    reuse the location of the vertex output with the same name.
//! 4. Rename the author's `main` and wrap it, so every draw follows WebGL's
//!    bottom-left origin (see [`orientation`]).
//!
//! The prepared sources are then parsed and validated with naga, and the
//! stage interfaces are checked against each other.

use std::collections::HashMap;
use std::fmt::Write as _;

use wgpu::naga;

use crate::context::DrawBinding;
use crate::error::{RenderError, Result, ShaderStage};

/// Bind group holding the uniform block.
pub const UNIFORM_GROUP: u32 = 0;
/// Bind group holding sampler texture/sampler pairs.
pub const SAMPLER_GROUP: u32 = 1;
/// Smallest uniform buffer handed to the device, even for empty blocks.
pub const MIN_BLOCK_SIZE: u32 = 16;

/// Byte offset of the per-draw orientation `vec4` inside the uniform block.
pub const ORIENTATION_OFFSET: u32 = 0;
const ORIENTATION_SIZE: u32 = 16;

const BLOCK_INSTANCE: &str = "feedback_params";
const ORIENTATION: &str = "feedback_orientation";
const FRAG_OUTPUT: &str = "feedback_frag_color";
const FRAG_COORD: &str = "feedback_frag_coord";
const AUTHOR_MAIN: &str = "feedback_author_main";

/// Per-draw constants `[clip_y_scale, frag_y_offset, frag_y_scale, 0]`.
///
/// Textures keep row 0 at the bottom like WebGL: offscreen draws flip clip
/// space so `+y` lands on the last row, and `gl_FragCoord.y` counts rows
/// upwards. The visible surface keeps its native top-down rows and mirrors
/// `gl_FragCoord.y` against its height instead.
pub fn orientation(binding: DrawBinding, height: u32) -> [f32; 4] {
    match binding {
        DrawBinding::Offscreen { .. } => [-1.0, 0.0, 1.0, 0.0],
        DrawBinding::Surface => [1.0, height as f32, -1.0, 0.0],
    }
}

/// Uniform types accepted as loose declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Vec2,
    Sampler2d,
}

impl UniformKind {
    fn parse(ty: &str) -> Option<Self> {
        match ty {
            "float" => Some(UniformKind::Float),
            "vec2" => Some(UniformKind::Vec2),
            "sampler2D" => Some(UniformKind::Sampler2d),
            _ => None,
        }
    }

    fn glsl_type(self) -> &'static str {
        match self {
            UniformKind::Float => "float",
            UniformKind::Vec2 => "vec2",
            UniformKind::Sampler2d => "sampler2D",
        }
    }

    /// std140 base alignment and size in bytes.
    fn std140(self) -> Option<(u32, u32)> {
        match self {
            UniformKind::Float => Some((4, 4)),
            UniformKind::Vec2 => Some((8, 8)),
            UniformKind::Sampler2d => None,
        }
    }
}

/// Where a uniform lives once the program is prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformLocation {
    /// Byte offset inside the std140 block.
    Block { offset: u32 },
    /// Bindings of the texture and sampler inside [`SAMPLER_GROUP`].
    Sampler {
        texture_binding: u32,
        sampler_binding: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBinding {
    pub name: String,
    pub kind: UniformKind,
    pub location: UniformLocation,
}

/// A located stage input or output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceVariable {
    pub name: String,
    pub ty: String,
    pub location: u32,
}

/// Reflection shared by both stages of a prepared program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramLayout {
    pub uniforms: Vec<UniformBinding>,
    pub attributes: Vec<InterfaceVariable>,
    /// Size of the uniform block, padded to 16 bytes.
    pub block_size: u32,
}

impl ProgramLayout {
    pub fn uniform_index(&self, name: &str) -> Option<usize> {
        self.uniforms.iter().position(|uniform| uniform.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&InterfaceVariable> {
        self.attributes
            .iter()
            .find(|attribute| attribute.name == name)
    }

    /// Sampler uniforms in binding order.
    pub fn samplers(&self) -> impl Iterator<Item = (usize, &UniformBinding)> {
        self.uniforms
            .iter()
            .enumerate()
            .filter(|(_, uniform)| uniform.kind == UniformKind::Sampler2d)
    }

    pub fn sampler_count(&self) -> usize {
        self.samplers().count()
    }
}

/// Both stages rewritten for the device plus their combined reflection.
#[derive(Debug, Clone)]
pub struct PreparedProgram {
    pub vertex: String,
    pub fragment: String,
    pub layout: ProgramLayout,
    vertex_prologue_lines: usize,
    fragment_prologue_lines: usize,
    vertex_outputs: Vec<InterfaceVariable>,
    fragment_inputs: Vec<InterfaceVariable>,
    uniform_conflicts: Vec<String>,
}

/// Prepares, validates and links a program.
///
/// The vertex stage is compiled first, then the fragment stage; the first
/// failing stage aborts with its diagnostics. Interface mismatches between
/// the stages are reported as link failures.
pub fn compile_program(vertex_source: &str, fragment_source: &str) -> Result<PreparedProgram> {
    let prepared = prepare_program(vertex_source, fragment_source)?;
    validate_lines(ShaderStage::Vertex, &prepared.vertex, prepared.vertex_prologue_lines)?;
    validate_lines(
        ShaderStage::Fragment,
        &prepared.fragment,
        prepared.fragment_prologue_lines,
    )?;
    link(&prepared)?;
    Ok(prepared)
}

/// Rewrites both stages around the shared prologue without validating them.
pub fn prepare_program(vertex_source: &str, fragment_source: &str) -> Result<PreparedProgram> {
    let vertex = scan_stage(ShaderStage::Vertex, vertex_source)?;
    let fragment = scan_stage(ShaderStage::Fragment, fragment_source)?;

    let (uniforms, block_size, uniform_conflicts) = layout_uniforms(&vertex, &fragment);
    let prologue = uniform_prologue(&uniforms);

    let mut attributes = Vec::new();
    let mut vertex_outputs = Vec::new();
    let mut taken_inputs = explicit_locations(&vertex, Role::Input);
    let mut taken_outputs = explicit_locations(&vertex, Role::Output);
    let vertex_body: Vec<String> = vertex
        .lines
        .iter()
        .map(|line| {
            line.render(|decl| {
                let (taken, qualifier) = match decl.role {
                    Role::Input => (&mut taken_inputs, "in"),
                    Role::Output => (&mut taken_outputs, "out"),
                };
                let mut rewritten = Vec::with_capacity(decl.names.len());
                for name in &decl.names {
                    let location = decl.location.unwrap_or_else(|| next_free(taken));
                    let variable = InterfaceVariable {
                        name: name.clone(),
                        ty: decl.ty.clone(),
                        location,
                    };
                    rewritten.push(located(qualifier, &variable));
                    match decl.role {
                        Role::Input => attributes.push(variable),
                        Role::Output => vertex_outputs.push(variable),
                    }
                }
                rewritten.join(" ")
            })
        })
        .collect();

    let output_locations: HashMap<String, u32> = vertex_outputs
        .iter()
        .map(|output| (output.name.clone(), output.location))
        .collect();
    let mut fragment_inputs = Vec::new();
    let mut fragment_outputs = 0usize;
    let mut taken_inputs = explicit_locations(&fragment, Role::Input);
    taken_inputs.extend(output_locations.values().copied());
    let mut taken_outputs = explicit_locations(&fragment, Role::Output);
    let fragment_body: Vec<String> = fragment
        .lines
        .iter()
        .map(|line| {
            line.render(|decl| {
                let mut rewritten = Vec::with_capacity(decl.names.len());
                for name in &decl.names {
                    let (qualifier, location) = match decl.role {
                        Role::Input => (
                            "in",
                            decl.location
                                .or_else(|| output_locations.get(name).copied())
                                .unwrap_or_else(|| next_free(&mut taken_inputs)),
                        ),
                        Role::Output => (
                            "out",
                            decl.location.unwrap_or_else(|| next_free(&mut taken_outputs)),
                        ),
                    };
                    let variable = InterfaceVariable {
                        name: name.clone(),
                        ty: decl.ty.clone(),
                        location,
                    };
                    rewritten.push(located(qualifier, &variable));
                    match decl.role {
                        Role::Input => fragment_inputs.push(variable),
                        Role::Output => fragment_outputs += 1,
                    }
                }
                rewritten.join(" ")
            })
        })
        .collect();

    let mut fragment_prologue = prologue.clone();
    if fragment_outputs == 0 {
        let _ = writeln!(
            fragment_prologue,
            "layout(location = 0) out vec4 {FRAG_OUTPUT};\n#define gl_FragColor {FRAG_OUTPUT}"
        );
    }
    let _ = writeln!(
        fragment_prologue,
        "vec4 {FRAG_COORD};\n#define gl_FragCoord {FRAG_COORD}"
    );

    let vertex_epilogue = format!(
        "void main() {{\n    {AUTHOR_MAIN}();\n    \
         gl_Position = vec4(gl_Position.x, gl_Position.y * {BLOCK_INSTANCE}.{ORIENTATION}.x, gl_Position.zw);\n}}\n"
    );
    let fragment_epilogue = format!(
        "#undef gl_FragCoord\nvoid main() {{\n    \
         {FRAG_COORD} = vec4(gl_FragCoord.x, {BLOCK_INSTANCE}.{ORIENTATION}.y + {BLOCK_INSTANCE}.{ORIENTATION}.z * gl_FragCoord.y, gl_FragCoord.zw);\n    \
         {AUTHOR_MAIN}();\n}}\n"
    );

    let (vertex, vertex_prologue_lines) =
        assemble(&prologue, &vertex_body, &vertex_epilogue, vertex_source);
    let (fragment, fragment_prologue_lines) =
        assemble(&fragment_prologue, &fragment_body, &fragment_epilogue, fragment_source);

    Ok(PreparedProgram {
        vertex,
        fragment,
        layout: ProgramLayout {
            uniforms,
            attributes,
            block_size,
        },
        vertex_prologue_lines,
        fragment_prologue_lines,
        vertex_outputs,
        fragment_inputs,
        uniform_conflicts,
    })
}

/// Parses and validates one prepared stage with naga.
pub fn validate_stage(stage: ShaderStage, source: &str) -> Result<naga::Module> {
    validate_lines(stage, source, 0)
}

/// Like [`validate_stage`], with diagnostics numbered from the line after
/// `prologue_lines`. Errors inside the generated prologue read `prelude:L:C`.
fn validate_lines(stage: ShaderStage, source: &str, prologue_lines: usize) -> Result<naga::Module> {
    let naga_stage = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    };
    let position = |span: naga::Span| {
        let location = span.location(source);
        let line = location.line_number as usize;
        if line > prologue_lines {
            format!("{}:{}", line - prologue_lines, location.line_position)
        } else {
            format!("prelude:{line}:{}", location.line_position)
        }
    };

    let mut frontend = naga::front::glsl::Frontend::default();
    let module = frontend
        .parse(&naga::front::glsl::Options::from(naga_stage), source)
        .map_err(|errors| {
            let diagnostics = errors
                .errors
                .iter()
                .map(|error| format!("{}: {}", position(error.meta), error.kind))
                .collect::<Vec<_>>()
                .join("\n");
            RenderError::compile(stage, diagnostics)
        })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    )
    .validate(&module)
    .map_err(|error| {
        let mut diagnostics = error.as_inner().to_string();
        for (span, label) in error.spans() {
            let _ = write!(diagnostics, "\n{}: {label}", position(*span));
        }
        RenderError::compile(stage, diagnostics)
    })?;

    Ok(module)
}

fn link(prepared: &PreparedProgram) -> Result<()> {
    let mut problems = prepared.uniform_conflicts.clone();
    for input in &prepared.fragment_inputs {
        match prepared
            .vertex_outputs
            .iter()
            .find(|output| output.name == input.name)
        {
            None => problems.push(format!(
                "fragment input `{}` is not written by the vertex shader",
                input.name
            )),
            Some(output) if output.ty != input.ty => problems.push(format!(
                "`{}` is `{}` in the vertex shader but `{}` in the fragment shader",
                input.name, output.ty, input.ty
            )),
            Some(output) if output.location != input.location => problems.push(format!(
                "`{}` uses location {} in the vertex shader but {} in the fragment shader",
                input.name, output.location, input.location
            )),
            Some(_) => {}
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(RenderError::link(problems.join("\n")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Input,
    Output,
}

#[derive(Debug)]
struct InterfaceDecl {
    role: Role,
    location: Option<u32>,
    ty: String,
    names: Vec<String>,
}

#[derive(Debug)]
struct UniformDecl {
    kind: UniformKind,
    names: Vec<String>,
}

#[derive(Debug)]
enum Piece {
    Text(String),
    Interface(InterfaceDecl),
}

#[derive(Debug)]
enum ScannedLine {
    /// Left as written apart from `(void)` parameter lists.
    Text(String),
    /// Declarations rebuilt from their statements. Comments on the line are
    /// dropped, so a block comment crossing the line is closed and reopened.
    Rewritten {
        pieces: Vec<Piece>,
        starts_in_comment: bool,
        ends_in_comment: bool,
    },
}

impl ScannedLine {
    fn interfaces(&self) -> impl Iterator<Item = &InterfaceDecl> {
        let pieces: &[Piece] = match self {
            ScannedLine::Text(_) => &[],
            ScannedLine::Rewritten { pieces, .. } => pieces.as_slice(),
        };
        pieces.iter().filter_map(|piece| match piece {
            Piece::Interface(decl) => Some(decl),
            Piece::Text(_) => None,
        })
    }

    fn render(&self, mut interface: impl FnMut(&InterfaceDecl) -> String) -> String {
        let (pieces, starts_in_comment, ends_in_comment) = match self {
            ScannedLine::Text(text) => return text.clone(),
            ScannedLine::Rewritten {
                pieces,
                starts_in_comment,
                ends_in_comment,
            } => (pieces, *starts_in_comment, *ends_in_comment),
        };

        let mut parts = Vec::with_capacity(pieces.len() + 2);
        if starts_in_comment {
            parts.push("*/".to_string());
        }
        for piece in pieces {
            parts.push(match piece {
                Piece::Text(text) => text.clone(),
                Piece::Interface(decl) => interface(decl),
            });
        }
        if ends_in_comment {
            parts.push("/*".to_string());
        }
        parts.join(" ")
    }
}

#[derive(Debug)]
struct ScannedStage {
    lines: Vec<ScannedLine>,
    uniforms: Vec<UniformDecl>,
}

#[derive(Debug, PartialEq, Eq)]
enum Storage {
    Uniform,
    Attribute,
    Varying,
    In,
    Out,
}

#[derive(Debug)]
struct Declaration {
    storage: Storage,
    location: Option<u32>,
    has_layout: bool,
    ty: String,
    names: Vec<String>,
    /// The statement as written, terminated by `;`.
    source: String,
}

fn scan_stage(stage: ShaderStage, source: &str) -> Result<ScannedStage> {
    let mut lines = Vec::new();
    let mut uniforms = Vec::new();
    let mut in_comment = false;
    for raw in source.lines() {
        let starts_in_comment = in_comment;
        let code = strip_comments(raw, &mut in_comment);
        let code = code.trim();

        let pieces = if code.starts_with("#version") {
            Some(Vec::new())
        } else {
            scan_statements(stage, code, &mut uniforms)?
        };
        lines.push(match pieces {
            Some(pieces) => ScannedLine::Rewritten {
                pieces,
                starts_in_comment,
                ends_in_comment: in_comment,
            },
            None => ScannedLine::Text(raw.replace("(void)", "()")),
        });
    }

    Ok(ScannedStage { lines, uniforms })
}

/// Removes `//` and `/* */` comments from one line. `in_block` carries an
/// unterminated block comment over to the next line.
fn strip_comments(raw: &str, in_block: &mut bool) -> String {
    let mut code = String::with_capacity(raw.len());
    let mut rest = raw;
    loop {
        if *in_block {
            let Some(end) = rest.find("*/") else {
                return code;
            };
            rest = &rest[end + 2..];
            *in_block = false;
            code.push(' ');
            continue;
        }
        match (rest.find("//"), rest.find("/*")) {
            (Some(line), block) if block.map_or(true, |block| line < block) => {
                code.push_str(&rest[..line]);
                return code;
            }
            (_, Some(block)) => {
                code.push_str(&rest[..block]);
                rest = &rest[block + 2..];
                *in_block = true;
            }
            (_, None) => {
                code.push_str(rest);
                return code;
            }
        }
    }
}

/// Splits a line of comment-free code into statements. Returns `None` when
/// none of them is a global declaration, leaving the line untouched.
fn scan_statements(
    stage: ShaderStage,
    code: &str,
    uniforms: &mut Vec<UniformDecl>,
) -> Result<Option<Vec<Piece>>> {
    let Some(body) = code.strip_suffix(';') else {
        return Ok(None);
    };
    let statements: Vec<&str> = body.split(';').map(str::trim).collect();
    let declares = statements.iter().any(|statement| {
        statement.starts_with("precision ") || parse_declaration(statement).is_some()
    });
    if !declares {
        return Ok(None);
    }

    let mut pieces = Vec::new();
    for statement in statements {
        if statement.is_empty() || statement.starts_with("precision ") {
            continue;
        }
        let Some(decl) = parse_declaration(statement) else {
            pieces.push(Piece::Text(format!("{statement};")));
            continue;
        };

        match (stage, &decl.storage) {
            (_, Storage::Uniform) if decl.has_layout => pieces.push(Piece::Text(decl.source)),
            (_, Storage::Uniform) => {
                let kind = UniformKind::parse(&decl.ty).ok_or_else(|| {
                    RenderError::compile(
                        stage,
                        format!(
                            "uniform `{}` has unsupported type `{}`; loose uniforms may be float, vec2 or sampler2D",
                            decl.names.join(", "),
                            decl.ty
                        ),
                    )
                })?;
                uniforms.push(UniformDecl {
                    kind,
                    names: decl.names,
                });
            }
            (ShaderStage::Fragment, Storage::Attribute) => {
                return Err(RenderError::compile(
                    stage,
                    format!(
                        "`attribute {}` is only valid in a vertex shader",
                        decl.names.join(", ")
                    ),
                ));
            }
            (ShaderStage::Vertex, Storage::Attribute | Storage::In)
            | (ShaderStage::Fragment, Storage::Varying | Storage::In) => {
                pieces.push(Piece::Interface(InterfaceDecl {
                    role: Role::Input,
                    location: decl.location,
                    ty: decl.ty,
                    names: decl.names,
                }));
            }
            (ShaderStage::Vertex, Storage::Varying | Storage::Out)
            | (ShaderStage::Fragment, Storage::Out) => {
                pieces.push(Piece::Interface(InterfaceDecl {
                    role: Role::Output,
                    location: decl.location,
                    ty: decl.ty,
                    names: decl.names,
                }));
            }
        }
    }
    Ok(Some(pieces))
}

/// Recognises one global declaration statement, without its `;`, such as
/// `layout(location = 1) in highp vec2 a, b`.
fn parse_declaration(statement: &str) -> Option<Declaration> {
    let statement = statement.trim();
    let mut rest = statement;
    let mut location = None;
    let mut has_layout = false;

    if let Some(after) = rest.strip_prefix("layout") {
        let after = after.trim_start().strip_prefix('(')?;
        let (qualifiers, tail) = after.split_once(')')?;
        has_layout = true;
        for qualifier in qualifiers.split(',') {
            if let Some((key, value)) = qualifier.split_once('=') {
                if key.trim() == "location" {
                    location = Some(value.trim().parse().ok()?);
                }
            }
        }
        rest = tail.trim_start();
    }

    if rest.contains(['{', '}', '(', '[', '=']) {
        return None;
    }

    let mut tokens = rest.split_whitespace().peekable();
    let storage = match tokens.next()? {
        "uniform" => Storage::Uniform,
        "attribute" => Storage::Attribute,
        "varying" => Storage::Varying,
        "in" => Storage::In,
        "out" => Storage::Out,
        _ => return None,
    };
    if tokens
        .peek()
        .is_some_and(|token| matches!(*token, "lowp" | "mediump" | "highp"))
    {
        tokens.next();
    }
    let ty = tokens.next()?.to_string();
    let names: Vec<String> = tokens
        .collect::<Vec<_>>()
        .join(" ")
        .split(',')
        .map(|name| name.trim().to_string())
        .collect();
    if names.iter().any(|name| !is_identifier(name)) {
        return None;
    }

    Some(Declaration {
        storage,
        location,
        has_layout,
        ty,
        names,
        source: format!("{statement};"),
    })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn layout_uniforms(
    vertex: &ScannedStage,
    fragment: &ScannedStage,
) -> (Vec<UniformBinding>, u32, Vec<String>) {
    let mut uniforms: Vec<UniformBinding> = Vec::new();
    let mut conflicts = Vec::new();
    let mut cursor = ORIENTATION_SIZE;
    let mut samplers = 0u32;

    let declared = vertex.uniforms.iter().chain(fragment.uniforms.iter());
    for decl in declared {
        for name in &decl.names {
            if let Some(existing) = uniforms.iter().find(|uniform| &uniform.name == name) {
                if existing.kind != decl.kind {
                    conflicts.push(format!(
                        "uniform `{name}` is declared as both `{}` and `{}`",
                        existing.kind.glsl_type(),
                        decl.kind.glsl_type()
                    ));
                }
                continue;
            }
            let location = match decl.kind.std140() {
                Some((align, size)) => {
                    let offset = cursor.next_multiple_of(align);
                    cursor = offset + size;
                    UniformLocation::Block { offset }
                }
                None => {
                    let texture_binding = samplers * 2;
                    samplers += 1;
                    UniformLocation::Sampler {
                        texture_binding,
                        sampler_binding: texture_binding + 1,
                    }
                }
            };
            uniforms.push(UniformBinding {
                name: name.clone(),
                kind: decl.kind,
                location,
            });
        }
    }

    let block_size = cursor.next_multiple_of(16).max(MIN_BLOCK_SIZE);
    (uniforms, block_size, conflicts)
}

fn uniform_prologue(uniforms: &[UniformBinding]) -> String {
    let mut prologue = String::new();
    let values: Vec<&UniformBinding> = uniforms
        .iter()
        .filter(|uniform| matches!(uniform.location, UniformLocation::Block { .. }))
        .collect();

    let _ = writeln!(
        prologue,
        "layout(std140, set = {UNIFORM_GROUP}, binding = 0) uniform FeedbackParams {{\n    vec4 {ORIENTATION};"
    );
    for uniform in &values {
        let _ = writeln!(
            prologue,
            "    {} feedback_{};",
            uniform.kind.glsl_type(),
            uniform.name
        );
    }
    let _ = writeln!(prologue, "}} {BLOCK_INSTANCE};");
    for uniform in &values {
        let _ = writeln!(
            prologue,
            "#define {name} {BLOCK_INSTANCE}.feedback_{name}",
            name = uniform.name
        );
    }

    for uniform in uniforms {
        if let UniformLocation::Sampler {
            texture_binding,
            sampler_binding,
        } = uniform.location
        {
            let name = &uniform.name;
            let _ = writeln!(
                prologue,
                "layout(set = {SAMPLER_GROUP}, binding = {texture_binding}) uniform texture2D feedback_{name}_texture;\n\
                 layout(set = {SAMPLER_GROUP}, binding = {sampler_binding}) uniform sampler feedback_{name}_sampler;\n\
                 #define {name} sampler2D(feedback_{name}_texture, feedback_{name}_sampler)"
            );
        }
    }

    prologue
}

fn explicit_locations(stage: &ScannedStage, role: Role) -> Vec<u32> {
    stage
        .lines
        .iter()
        .flat_map(ScannedLine::interfaces)
        .filter(|decl| decl.role == role)
        .filter_map(|decl| decl.location)
        .collect()
}

fn next_free(taken: &mut Vec<u32>) -> u32 {
    let location = (0..).find(|candidate| !taken.contains(candidate)).unwrap_or(0);
    taken.push(location);
    location
}

fn located(qualifier: &str, variable: &InterfaceVariable) -> String {
    format!(
        "layout(location = {}) {qualifier} {} {};",
        variable.location, variable.ty, variable.name
    )
}

/// Joins the generated prologue, the author's lines and the wrapping
/// `main`. Also returns how many lines precede the author's first line.
fn assemble(prologue: &str, body: &[String], epilogue: &str, original: &str) -> (String, usize) {
    let mut source = String::from("#version 450\n");
    source.push_str(prologue);
    if original.contains("texture2D") {
        source.push_str("#define texture2D texture\n");
    }
    let _ = writeln!(source, "#define main {AUTHOR_MAIN}");
    let prologue_lines = source.lines().count();
    for line in body {
        source.push_str(line);
        source.push('\n');
    }
    source.push_str("#undef main\n");
    source.push_str(epilogue);
    (source, prologue_lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = r"
        attribute vec4 aVertexPosition;

        void main(void) {
          gl_Position = aVertexPosition;
        }
    ";

    const DISPLAY: &str = r"
        precision highp float;
        uniform sampler2D uTexture;
        uniform vec2 uResolution;
        void main() {
          gl_FragColor = texture2D(uTexture, gl_FragCoord.xy / uResolution);
        }
    ";

    #[test]
    fn lifts_loose_uniforms_into_block_and_sampler_pairs() {
        let prepared = prepare_program(VERTEX, DISPLAY).expect("prepare");
        let layout = &prepared.layout;

        assert_eq!(layout.uniforms.len(), 2);
        assert_eq!(layout.uniforms[0].name, "uTexture");
        assert_eq!(
            layout.uniforms[0].location,
            UniformLocation::Sampler {
                texture_binding: 0,
                sampler_binding: 1
            }
        );
        assert_eq!(
            layout.uniforms[1].location,
            UniformLocation::Block { offset: 16 }
        );
        assert_eq!(layout.block_size, 32);

        assert!(!prepared.fragment.contains("uniform sampler2D uTexture"));
        assert!(prepared
            .fragment
            .contains("#define uResolution feedback_params.feedback_uResolution"));
        assert!(prepared.fragment.contains("#define texture2D texture"));
        assert!(prepared.fragment.contains("#define gl_FragColor"));
        assert!(!prepared.fragment.contains("precision highp"));
    }

    #[test]
    fn block_offsets_follow_std140_alignment() {
        let fragment = r"
            uniform float uTime;
            uniform vec2 uResolution;
            uniform float uDecay;
            void main() { gl_FragColor = vec4(uTime, uResolution, uDecay); }
        ";
        let prepared = prepare_program(VERTEX, fragment).expect("prepare");
        let offsets: Vec<_> = prepared
            .layout
            .uniforms
            .iter()
            .map(|uniform| uniform.location)
            .collect();
        assert_eq!(
            offsets,
            vec![
                UniformLocation::Block { offset: 16 },
                UniformLocation::Block { offset: 24 },
                UniformLocation::Block { offset: 32 },
            ]
        );
        assert_eq!(prepared.layout.block_size, 48);
    }

    #[test]
    fn attributes_receive_locations_and_void_parameter_lists_are_dropped() {
        let prepared = prepare_program(VERTEX, DISPLAY).expect("prepare");
        let position = prepared
            .layout
            .attribute("aVertexPosition")
            .expect("position attribute");
        assert_eq!(position.location, 0);
        assert_eq!(position.ty, "vec4");
        assert!(prepared
            .vertex
            .contains("layout(location = 0) in vec4 aVertexPosition;"));
        assert!(!prepared.vertex.contains("(void)"));
    }

    #[test]
    fn diagnostics_use_author_line_numbers() {
        let fragment = "precision highp float;\nuniform vec2 uResolution;\nvoid main() {\n    gl_FragColor = vec4(undefined_thing);\n}\n";
        match compile_program(VERTEX, fragment).unwrap_err() {
            RenderError::Compile { stage, diagnostics } => {
                assert_eq!(stage, ShaderStage::Fragment);
                let first = diagnostics.lines().next().unwrap_or_default();
                assert!(first.starts_with("4:"), "diagnostics: {diagnostics}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rewritten_lines_keep_their_positions() {
        let prepared = prepare_program(VERTEX, DISPLAY).expect("prepare");
        let body: Vec<&str> = prepared
            .fragment
            .lines()
            .skip(prepared.fragment_prologue_lines)
            .take(DISPLAY.lines().count())
            .collect();
        assert_eq!(body.len(), DISPLAY.lines().count());
        assert!(body[5].contains("gl_FragColor = texture2D"));
    }

    #[test]
    fn every_stage_wraps_the_author_main() {
        let prepared = prepare_program(VERTEX, DISPLAY).expect("prepare");
        assert!(prepared.vertex.contains("#define main feedback_author_main"));
        assert!(prepared
            .vertex
            .contains("gl_Position.y * feedback_params.feedback_orientation.x"));
        assert!(prepared
            .fragment
            .contains("#define gl_FragCoord feedback_frag_coord"));
        assert!(prepared.fragment.contains("#undef gl_FragCoord"));

        let bare = "void main() { gl_FragColor = vec4(1.0); }\n";
        let prepared = prepare_program(VERTEX, bare).expect("prepare");
        assert!(prepared.layout.uniforms.is_empty());
        assert!(prepared.fragment.contains("vec4 feedback_orientation;"));
        assert_eq!(prepared.layout.block_size, MIN_BLOCK_SIZE);
    }

    #[test]
    fn orientation_flips_offscreen_clip_space_and_surface_frag_coord() {
        let offscreen = DrawBinding::Offscreen {
            target: crate::context::DrawTargetId(0),
            texture: crate::context::TextureId(0),
        };
        assert_eq!(orientation(offscreen, 600), [-1.0, 0.0, 1.0, 0.0]);
        assert_eq!(orientation(DrawBinding::Surface, 600), [1.0, 600.0, -1.0, 0.0]);
    }

    #[test]
    fn block_comments_hide_declarations() {
        let fragment = r"
            /* uniform float uRetired; */
            /*
            uniform vec2 uAlsoRetired;
            */
            uniform float uTime; /* kept
            still a comment */
            void main() { gl_FragColor = vec4(uTime); }
        ";
        let prepared = prepare_program(VERTEX, fragment).expect("prepare");
        let names: Vec<_> = prepared
            .layout
            .uniforms
            .iter()
            .map(|uniform| uniform.name.as_str())
            .collect();
        assert_eq!(names, vec!["uTime"]);
        assert!(prepared.fragment.contains("/*\n            still a comment */"));
        compile_program(VERTEX, fragment).expect("compile");
    }

    #[test]
    fn several_declarations_on_one_line_are_all_lifted() {
        let fragment = r"
            uniform vec2 uResolution; uniform float uTime; // both
            void main() { gl_FragColor = vec4(uResolution, uTime, 1.0); }
        ";
        let prepared = prepare_program(VERTEX, fragment).expect("prepare");
        assert_eq!(
            prepared.layout.uniform_index("uResolution"),
            Some(0),
            "{:?}",
            prepared.layout
        );
        assert_eq!(prepared.layout.uniform_index("uTime"), Some(1));
        assert!(!prepared.fragment.contains("uniform float uTime"));
        compile_program(VERTEX, fragment).expect("compile");
    }

    #[test]
    fn mixed_varyings_on_one_line_get_distinct_locations() {
        let vertex = r"
            attribute vec2 aPosition; varying vec2 vUv;
            void main() { vUv = aPosition; gl_Position = vec4(aPosition, 0.0, 1.0); }
        ";
        let prepared = prepare_program(vertex, DISPLAY).expect("prepare");
        assert!(prepared
            .vertex
            .contains("layout(location = 0) in vec2 aPosition; layout(location = 0) out vec2 vUv;"));
    }

    #[test]
    fn fragment_varyings_reuse_vertex_locations() {
        let vertex = r"
            attribute vec2 aPosition;
            varying vec2 vFirst;
            varying vec2 vSecond;
            void main() { vFirst = aPosition; vSecond = aPosition; gl_Position = vec4(aPosition, 0.0, 1.0); }
        ";
        let fragment = r"
            varying vec2 vSecond;
            void main() { gl_FragColor = vec4(vSecond, 0.0, 1.0); }
        ";
        let prepared = prepare_program(vertex, fragment).expect("prepare");
        assert!(prepared
            .fragment
            .contains("layout(location = 1) in vec2 vSecond;"));
        assert!(link(&prepared).is_ok());
    }

    #[test]
    fn unsupported_uniform_types_fail_the_declaring_stage() {
        let fragment = "uniform mat4 uTransform;\nvoid main() {}\n";
        let error = prepare_program(VERTEX, fragment).unwrap_err();
        match error {
            RenderError::Compile { stage, diagnostics } => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(diagnostics.contains("uTransform"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unmatched_varyings_fail_to_link() {
        let fragment = r"
            varying vec2 vMissing;
            void main() { gl_FragColor = vec4(vMissing, 0.0, 1.0); }
        ";
        let prepared = prepare_program(VERTEX, fragment).expect("prepare");
        match link(&prepared).unwrap_err() {
            RenderError::Link { diagnostics } => assert!(diagnostics.contains("vMissing")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn conflicting_uniform_types_fail_to_link() {
        let vertex = r"
            attribute vec4 aVertexPosition;
            uniform float uScale;
            void main() { gl_Position = aVertexPosition * uScale; }
        ";
        let fragment = r"
            uniform vec2 uScale;
            void main() { gl_FragColor = vec4(uScale, 0.0, 1.0); }
        ";
        let prepared = prepare_program(vertex, fragment).expect("prepare");
        assert!(matches!(link(&prepared), Err(RenderError::Link { .. })));
    }

    #[test]
    fn explicit_layout_uniforms_pass_through_untouched() {
        let fragment = r"
            layout(set = 2, binding = 0) uniform texture2D uExtra;
            void main() { gl_FragColor = vec4(1.0); }
        ";
        let prepared = prepare_program(VERTEX, fragment).expect("prepare");
        assert!(prepared.layout.uniforms.is_empty());
        assert!(prepared
            .fragment
            .contains("layout(set = 2, binding = 0) uniform texture2D uExtra;"));
    }

    #[test]
    fn naga_accepts_prepared_pass_through_program() {
        let prepared = compile_program(VERTEX, DISPLAY).expect("compile");
        assert_eq!(prepared.layout.sampler_count(), 1);
    }

    #[test]
    fn naga_reports_fragment_syntax_errors() {
        let fragment = "void main() { gl_FragColor = vec4(1.0) }\n";
        match compile_program(VERTEX, fragment).unwrap_err() {
            RenderError::Compile { stage, diagnostics } => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(!diagnostics.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
