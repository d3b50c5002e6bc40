//! WGSL sources. `PACKING_WGSL` is prepended to every voxel shader and mirrors
//! `crate::packing`.

pub const PACKING_WGSL: &str = r#"
const EMPTY_VOXEL: u32 = 0u;
const MAX_SAMPLE_COUNT: u32 = 255u;
const FULL_COVERAGE: u32 = 255u;

struct LevelParams {
  resolution: u32,
  source_resolution: u32,
  _pad0: vec2<u32>,
};

fn unpack_bytes(packed: u32) -> vec4<u32> {
  return vec4<u32>(packed & 255u, (packed >> 8u) & 255u, (packed >> 16u) & 255u, packed >> 24u);
}

fn pack_bytes(bytes: vec4<u32>) -> u32 {
  let b = min(bytes, vec4<u32>(255u));
  return b.x | (b.y << 8u) | (b.z << 16u) | (b.w << 24u);
}

fn unpack_unorm(packed: u32) -> vec4<f32> {
  return vec4<f32>(unpack_bytes(packed)) / 255.0;
}

fn unorm_to_byte(value: f32) -> u32 {
  return u32(floor(clamp(value, 0.0, 1.0) * 255.0 + 0.5));
}

fn encode_normal(normal: vec3<f32>) -> vec3<f32> {
  var n = vec3<f32>(0.0);
  let len = length(normal);
  if (len > 0.0) {
    n = normal / len;
  }
  return n * 0.5 + vec3<f32>(0.5);
}

fn pack_normal(normal: vec3<f32>, coverage: u32) -> u32 {
  let e = encode_normal(normal);
  return pack_bytes(vec4<u32>(unorm_to_byte(e.x), unorm_to_byte(e.y), unorm_to_byte(e.z), coverage));
}

fn blend_sample(previous: u32, rgb: vec3<f32>) -> u32 {
  let prev = unpack_bytes(previous);
  let count = prev.w;
  if (count >= MAX_SAMPLE_COUNT) {
    return previous;
  }
  let weight = f32(count);
  let incoming = clamp(rgb, vec3<f32>(0.0), vec3<f32>(1.0)) * 255.0;
  let blended = (vec3<f32>(prev.xyz) * weight + incoming) / (weight + 1.0);
  let rounded = vec3<u32>(floor(blended + vec3<f32>(0.5)));
  return pack_bytes(vec4<u32>(rounded, count + 1u));
}

fn single_sample(rgb: vec3<f32>) -> u32 {
  let incoming = clamp(rgb, vec3<f32>(0.0), vec3<f32>(1.0)) * 255.0;
  let rounded = vec3<u32>(floor(incoming + vec3<f32>(0.5)));
  return pack_bytes(vec4<u32>(rounded, 1u));
}

fn voxel_linear(index: vec3<u32>, resolution: u32) -> u32 {
  return index.x + resolution * (index.y + resolution * index.z);
}
"#;

pub const CLEAR_WGSL: &str = r#"
@group(0) @binding(0) var<uniform> params: LevelParams;
@group(0) @binding(1) var<storage, read_write> voxel_colour: array<u32>;
@group(0) @binding(2) var<storage, read_write> voxel_normal: array<u32>;

@compute @workgroup_size(4, 4, 4)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
  let res = params.resolution;
  if (any(id >= vec3<u32>(res))) {
    return;
  }
  let cell = voxel_linear(id, res);
  voxel_colour[cell] = EMPTY_VOXEL;
  voxel_normal[cell] = EMPTY_VOXEL;
}
"#;

/// Dominant-axis rasterization. One draw per axis; triangles of the other two
/// axes are moved outside the clip volume by the vertex stage.
pub const POPULATE_WGSL: &str = r#"
const MAX_CAS_ATTEMPTS: u32 = 256u;
const POLICY_LAST_WRITE_WINS: u32 = 1u;

struct PopulateParams {
  resolution: u32,
  axis: u32,
  policy: u32,
  _pad0: u32,
};

@group(0) @binding(0) var<uniform> params: PopulateParams;
@group(0) @binding(1) var<storage, read_write> voxel_colour: array<atomic<u32>>;
@group(0) @binding(2) var<storage, read_write> voxel_normal: array<atomic<u32>>;

struct VertexInput {
  @location(0) grid_position: vec3<f32>,
  @location(1) axis: u32,
  @location(2) normal: vec3<f32>,
  @location(3) colour: vec4<f32>,
};

struct VertexOutput {
  @builtin(position) clip_position: vec4<f32>,
  @location(0) grid_position: vec3<f32>,
  @location(1) normal: vec3<f32>,
  @location(2) @interpolate(flat) colour: vec4<f32>,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
  var out: VertexOutput;
  out.grid_position = in.grid_position;
  out.normal = in.normal;
  out.colour = in.colour;
  if (in.axis != params.axis) {
    // All three vertices land on the same point outside the clip volume.
    out.clip_position = vec4<f32>(2.0, 2.0, 2.0, 1.0);
    return out;
  }
  let g = in.grid_position;
  var projected = g;
  if (params.axis == 0u) {
    projected = g.yzx;
  } else if (params.axis == 1u) {
    projected = g.zxy;
  }
  out.clip_position = vec4<f32>(projected.xy, projected.z * 0.5 + 0.5, 1.0);
  return out;
}

fn accumulate_colour(cell: u32, rgb: vec3<f32>) {
  var current = atomicLoad(&voxel_colour[cell]);
  for (var attempt = 0u; attempt < MAX_CAS_ATTEMPTS; attempt = attempt + 1u) {
    let next = blend_sample(current, rgb);
    if (next == current) {
      break;
    }
    let result = atomicCompareExchangeWeak(&voxel_colour[cell], current, next);
    if (result.exchanged) {
      break;
    }
    current = result.old_value;
  }
}

fn accumulate_normal(cell: u32, rgb: vec3<f32>) {
  var current = atomicLoad(&voxel_normal[cell]);
  for (var attempt = 0u; attempt < MAX_CAS_ATTEMPTS; attempt = attempt + 1u) {
    let next = blend_sample(current, rgb);
    if (next == current) {
      break;
    }
    let result = atomicCompareExchangeWeak(&voxel_normal[cell], current, next);
    if (result.exchanged) {
      break;
    }
    current = result.old_value;
  }
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
  let res = params.resolution;
  let voxel = (in.grid_position + vec3<f32>(1.0)) * 0.5 * f32(res);
  if (any(voxel < vec3<f32>(0.0)) || any(voxel > vec3<f32>(f32(res)))) {
    discard;
  }
  let index = min(vec3<u32>(floor(voxel)), vec3<u32>(res - 1u));
  let cell = voxel_linear(index, res);
  let normal = encode_normal(in.normal);

  if (params.policy == POLICY_LAST_WRITE_WINS) {
    atomicStore(&voxel_colour[cell], single_sample(in.colour.rgb));
    atomicStore(&voxel_normal[cell], single_sample(normal));
  } else {
    accumulate_colour(cell, in.colour.rgb);
    accumulate_normal(cell, normal);
  }
  return vec4<f32>(0.0);
}
"#;

/// Accumulation format to resolved format for the base level.
pub const RESOLVE_WGSL: &str = r#"
@group(0) @binding(0) var<uniform> params: LevelParams;
@group(0) @binding(1) var<storage, read> accum_colour: array<u32>;
@group(0) @binding(2) var<storage, read> accum_normal: array<u32>;
@group(0) @binding(3) var<storage, read_write> level_colour: array<u32>;
@group(0) @binding(4) var<storage, read_write> level_normal: array<u32>;
@group(0) @binding(5) var colour_texture: texture_storage_3d<rgba8unorm, write>;
@group(0) @binding(6) var normal_texture: texture_storage_3d<rgba8unorm, write>;

@compute @workgroup_size(4, 4, 4)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
  let res = params.resolution;
  if (any(id >= vec3<u32>(res))) {
    return;
  }
  let cell = voxel_linear(id, res);

  var colour = EMPTY_VOXEL;
  let accumulated_colour = accum_colour[cell];
  if ((accumulated_colour >> 24u) != 0u) {
    colour = (accumulated_colour & 0x00ffffffu) | (FULL_COVERAGE << 24u);
  }
  var normal = EMPTY_VOXEL;
  let accumulated_normal = accum_normal[cell];
  if ((accumulated_normal >> 24u) != 0u) {
    let encoded = unpack_unorm(accumulated_normal).xyz;
    normal = pack_normal(encoded * 2.0 - vec3<f32>(1.0), FULL_COVERAGE);
  }

  level_colour[cell] = colour;
  level_normal[cell] = normal;
  textureStore(colour_texture, id, unpack_unorm(colour));
  textureStore(normal_texture, id, unpack_unorm(normal));
}
"#;

/// Coverage-weighted box filter of eight children into one coarser voxel.
pub const DOWNSAMPLE_WGSL: &str = r#"
@group(0) @binding(0) var<uniform> params: LevelParams;
@group(0) @binding(1) var<storage, read> fine_colour: array<u32>;
@group(0) @binding(2) var<storage, read> fine_normal: array<u32>;
@group(0) @binding(3) var<storage, read_write> coarse_colour: array<u32>;
@group(0) @binding(4) var<storage, read_write> coarse_normal: array<u32>;
@group(0) @binding(5) var colour_texture: texture_storage_3d<rgba8unorm, write>;
@group(0) @binding(6) var normal_texture: texture_storage_3d<rgba8unorm, write>;

@compute @workgroup_size(4, 4, 4)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
  let res = params.resolution;
  let fine_res = params.source_resolution;
  if (any(id >= vec3<u32>(res))) {
    return;
  }

  var coverage_sum = 0u;
  var weighted_rgb = vec3<u32>(0u);
  var weighted_normal = vec3<f32>(0.0);
  for (var i = 0u; i < 8u; i = i + 1u) {
    let child = id * 2u + vec3<u32>(i & 1u, (i >> 1u) & 1u, (i >> 2u) & 1u);
    if (any(child >= vec3<u32>(fine_res))) {
      continue;
    }
    let child_linear = voxel_linear(child, fine_res);
    let colour = unpack_bytes(fine_colour[child_linear]);
    if (colour.w == 0u) {
      continue;
    }
    coverage_sum = coverage_sum + colour.w;
    weighted_rgb = weighted_rgb + colour.xyz * colour.w;
    let encoded = unpack_unorm(fine_normal[child_linear]).xyz;
    weighted_normal = weighted_normal + (encoded * 2.0 - vec3<f32>(1.0)) * f32(colour.w);
  }

  var colour = EMPTY_VOXEL;
  var normal = EMPTY_VOXEL;
  if (coverage_sum > 0u) {
    let rgb = (weighted_rgb + vec3<u32>(coverage_sum / 2u)) / coverage_sum;
    let coverage = max((coverage_sum + 4u) / 8u, 1u);
    colour = pack_bytes(vec4<u32>(rgb, coverage));
    normal = pack_normal(weighted_normal, coverage);
  }

  let cell = voxel_linear(id, res);
  coarse_colour[cell] = colour;
  coarse_normal[cell] = normal;
  textureStore(colour_texture, id, unpack_unorm(colour));
  textureStore(normal_texture, id, unpack_unorm(normal));
}
"#;

pub const DEBUG_CUBE_WGSL: &str = r#"
struct Camera {
  view_projection: mat4x4<f32>,
};

@group(0) @binding(0) var<uniform> camera: Camera;

struct InstanceInput {
  @location(0) model_0: vec4<f32>,
  @location(1) model_1: vec4<f32>,
  @location(2) model_2: vec4<f32>,
  @location(3) model_3: vec4<f32>,
  @location(4) colour: vec4<f32>,
};

struct VertexOutput {
  @builtin(position) clip_position: vec4<f32>,
  @location(0) colour: vec4<f32>,
};

const CUBE_CORNERS = array<vec3<f32>, 8>(
  vec3<f32>(-0.5, -0.5, -0.5),
  vec3<f32>(0.5, -0.5, -0.5),
  vec3<f32>(-0.5, 0.5, -0.5),
  vec3<f32>(0.5, 0.5, -0.5),
  vec3<f32>(-0.5, -0.5, 0.5),
  vec3<f32>(0.5, -0.5, 0.5),
  vec3<f32>(-0.5, 0.5, 0.5),
  vec3<f32>(0.5, 0.5, 0.5)
);

// Two triangles per face: -x, +x, -y, +y, -z, +z.
const CUBE_INDICES = array<u32, 36>(
  0u, 4u, 6u, 0u, 6u, 2u,
  1u, 3u, 7u, 1u, 7u, 5u,
  0u, 1u, 5u, 0u, 5u, 4u,
  2u, 6u, 7u, 2u, 7u, 3u,
  0u, 2u, 3u, 0u, 3u, 1u,
  4u, 5u, 7u, 4u, 7u, 6u
);

const FACE_SHADE = array<f32, 6>(0.7, 0.7, 0.55, 1.0, 0.85, 0.85);

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32, instance: InstanceInput) -> VertexOutput {
  var corners = CUBE_CORNERS;
  var indices = CUBE_INDICES;
  var shades = FACE_SHADE;
  let model = mat4x4<f32>(instance.model_0, instance.model_1, instance.model_2, instance.model_3);
  let corner = corners[indices[vertex_index % 36u]];
  let shade = shades[(vertex_index % 36u) / 6u];

  var out: VertexOutput;
  out.clip_position = camera.view_projection * model * vec4<f32>(corner, 1.0);
  out.colour = vec4<f32>(instance.colour.rgb * shade, instance.colour.a);
  return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
  return in.colour;
}
"#;

/// Full source of a voxel shader with the shared packing helpers prepended.
pub fn with_packing(source: &str) -> String {
    format!("{PACKING_WGSL}\n{source}")
}
