//! WGSL sources of the built-in passes
//!
//! Programs are assembled from the snippets below. Every program that needs
//! camera data includes [`VIEW_PARAMS`] verbatim, so they all resolve to the
//! same pooled constant buffer and the view is uploaded once per frame.

/// Per-view camera block, bound at uniform binding 0
pub const VIEW_PARAMS: &str = r#"
struct ViewParams {
    view_proj: mat4x4<f32>,
    view_proj_jittered: mat4x4<f32>,
    prev_view_proj: mat4x4<f32>,
    prev_view_proj_rejittered: mat4x4<f32>,
    inv_view_proj: mat4x4<f32>,
    camera_position: vec4<f32>,
    viewport_size: vec4<f32>,
    jitter_uv: vec4<f32>,
}

@group(0) @binding(0) var<uniform> camera: ViewParams;

fn clip_to_uv(clip: vec4<f32>) -> vec2<f32> {
    let ndc = clip.xy / clip.w;
    return vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
}

fn world_from_depth(uv: vec2<f32>, depth: f32) -> vec3<f32> {
    let ndc = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let world = camera.inv_view_proj * ndc;
    return world.xyz / world.w;
}
"#;

/// Per-object transforms, bound at uniform binding 1
pub const OBJECT_PARAMS: &str = r#"
struct ObjectParams {
    world: mat4x4<f32>,
    prev_world: mat4x4<f32>,
}

@group(0) @binding(1) var<uniform> object: ObjectParams;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
}
"#;

/// Background model, bound at uniform binding 2
pub const ENVIRONMENT: &str = r#"
struct EnvironmentParams {
    sky_color: vec4<f32>,
    horizon_color: vec4<f32>,
    // w = intensity
    ground_color: vec4<f32>,
}

@group(0) @binding(2) var<uniform> environment: EnvironmentParams;

fn environment_radiance(direction: vec3<f32>, env_type: u32) -> vec3<f32> {
    let intensity = environment.ground_color.w;
    if env_type == 0u {
        return environment.sky_color.rgb * intensity;
    }
    let up = clamp(direction.y, -1.0, 1.0);
    if up < 0.0 {
        let t = min(-up * 4.0, 1.0);
        return mix(environment.horizon_color.rgb, environment.ground_color.rgb, vec3<f32>(t)) * intensity;
    }
    if env_type == 1u {
        return mix(environment.horizon_color.rgb, environment.sky_color.rgb, vec3<f32>(up)) * intensity;
    }
    let falloff = 1.0 - exp(-up * 6.0);
    return mix(environment.horizon_color.rgb, environment.sky_color.rgb, vec3<f32>(falloff)) * intensity;
}
"#;

/// Single triangle covering the viewport
pub const FULLSCREEN: &str = r#"
struct FullscreenOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_fullscreen(@builtin(vertex_index) vertex_index: u32) -> FullscreenOutput {
    var output: FullscreenOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, 1.0 - y);
    return output;
}
"#;

pub const SKY_VELOCITY: &str = r#"
@fragment
fn fs_sky_velocity(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let far = world_from_depth(input.uv, 1.0);
    let direction = normalize(far - camera.camera_position.xyz);
    // Directions only: the sky does not move with the camera position.
    let prev_clip = camera.prev_view_proj * vec4<f32>(direction, 0.0);
    if prev_clip.w <= 0.0 {
        return vec4<f32>(0.0);
    }
    return vec4<f32>(input.uv - clip_to_uv(prev_clip), 0.0, 0.0);
}
"#;

pub const GBUFFER: &str = r#"
struct MaterialParams {
    base_color: vec4<f32>,
    metallic_roughness: vec4<f32>,
    // rgb = color, w = strength
    emissive: vec4<f32>,
}

@group(0) @binding(2) var<uniform> material: MaterialParams;
@group(1) @binding(0) var base_color_texture: texture_2d<f32>;
@group(2) @binding(0) var base_color_sampler: sampler;

struct GBufferVertex {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_normal: vec3<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) current_clip: vec4<f32>,
    @location(3) prev_clip: vec4<f32>,
}

@vertex
fn vs_gbuffer(input: VertexInput) -> GBufferVertex {
    var output: GBufferVertex;
    let world_position = object.world * vec4<f32>(input.position, 1.0);
    let prev_position = object.prev_world * vec4<f32>(input.position, 1.0);
    output.clip_position = camera.view_proj_jittered * world_position;
    output.world_normal = (object.world * vec4<f32>(input.normal, 0.0)).xyz;
    output.uv = input.uv;
    output.current_clip = output.clip_position;
    // Same jitter on both sides, so the difference is pure motion.
    output.prev_clip = camera.prev_view_proj_rejittered * prev_position;
    return output;
}

struct GBufferOutput {
    @location(0) albedo: vec4<f32>,
    @location(1) normal: vec4<f32>,
    // metallic, roughness, emissive strength
    @location(2) material: vec4<f32>,
    @location(3) velocity: vec4<f32>,
}

@fragment
fn fs_gbuffer(input: GBufferVertex) -> GBufferOutput {
    var output: GBufferOutput;
    let texel = textureSample(base_color_texture, base_color_sampler, input.uv);
    output.albedo = vec4<f32>(material.base_color.rgb * texel.rgb, 1.0);
    output.normal = vec4<f32>(normalize(input.world_normal) * 0.5 + 0.5, 1.0);
    let e = material.emissive;
    let emissive = e.w * max(e.r, max(e.g, e.b));
    output.material = vec4<f32>(material.metallic_roughness.x, material.metallic_roughness.y, emissive, 1.0);
    output.velocity = vec4<f32>(clip_to_uv(input.current_clip) - clip_to_uv(input.prev_clip), 0.0, 0.0);
    return output;
}
"#;

pub const LIGHTING: &str = r#"
struct LightParams {
    // Direction the light travels in
    light_direction: vec4<f32>,
    light_radiance: vec4<f32>,
}

@group(0) @binding(1) var<uniform> light: LightParams;
@group(1) @binding(0) var gbuffer_albedo: texture_2d<f32>;
@group(1) @binding(1) var gbuffer_normal: texture_2d<f32>;
@group(1) @binding(2) var gbuffer_material: texture_2d<f32>;
@group(1) @binding(3) var gbuffer_depth: texture_depth_2d;

struct LightingOutput {
    @location(0) diffuse: vec4<f32>,
    @location(1) specular: vec4<f32>,
}

@fragment
fn fs_lighting(input: FullscreenOutput) -> LightingOutput {
    var output: LightingOutput;
    let pixel = vec2<i32>(input.position.xy);
    let depth = textureLoad(gbuffer_depth, pixel, 0);
    if depth >= 1.0 {
        return output;
    }

    let albedo = textureLoad(gbuffer_albedo, pixel, 0).rgb;
    let normal = normalize(textureLoad(gbuffer_normal, pixel, 0).xyz * 2.0 - 1.0);
    let params = textureLoad(gbuffer_material, pixel, 0);
    let metallic = params.x;
    let roughness = params.y;

    let world_position = world_from_depth(input.uv, depth);
    let view_dir = normalize(camera.camera_position.xyz - world_position);
    let light_dir = -normalize(light.light_direction.xyz);
    let radiance = light.light_radiance.rgb;

    let n_dot_l = max(dot(normal, light_dir), 0.0);
    let half_vec = normalize(light_dir + view_dir);
    let n_dot_h = max(dot(normal, half_vec), 0.0);
    let shininess = mix(16.0, 128.0, 1.0 - roughness);
    let spec_color = mix(vec3<f32>(0.04), albedo, vec3<f32>(metallic));
    let spec_strength = pow(n_dot_h, shininess) * (1.0 - roughness);

    output.diffuse = vec4<f32>(albedo * (1.0 - metallic) * n_dot_l * radiance, 1.0);
    output.specular = vec4<f32>(spec_color * spec_strength * n_dot_l * radiance, 1.0);
    return output;
}
"#;

/// Expects `ENV_TYPE` to be declared by the variant prefix.
pub const COMPOSITE: &str = r#"
@group(1) @binding(0) var gbuffer_albedo: texture_2d<f32>;
@group(1) @binding(1) var gbuffer_normal: texture_2d<f32>;
@group(1) @binding(2) var gbuffer_material: texture_2d<f32>;
@group(1) @binding(3) var lighting_diffuse: texture_2d<f32>;
@group(1) @binding(4) var lighting_specular: texture_2d<f32>;
@group(1) @binding(5) var gbuffer_depth: texture_depth_2d;

const AMBIENT_STRENGTH: f32 = 0.3;

@fragment
fn fs_composite(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(input.position.xy);
    let depth = textureLoad(gbuffer_depth, pixel, 0);
    var color: vec3<f32>;
    if depth >= 1.0 {
        let far = world_from_depth(input.uv, 1.0);
        color = environment_radiance(normalize(far - camera.camera_position.xyz), ENV_TYPE);
    } else {
        let albedo = textureLoad(gbuffer_albedo, pixel, 0).rgb;
        let normal = normalize(textureLoad(gbuffer_normal, pixel, 0).xyz * 2.0 - 1.0);
        let params = textureLoad(gbuffer_material, pixel, 0);
        let lit = textureLoad(lighting_diffuse, pixel, 0).rgb + textureLoad(lighting_specular, pixel, 0).rgb;
        let ambient = albedo * environment_radiance(normal, ENV_TYPE) * AMBIENT_STRENGTH;
        color = lit + ambient + albedo * params.z;
    }
    let mapped = color / (vec3<f32>(1.0) + color);
    return vec4<f32>(mapped, 1.0);
}
"#;

pub const REPROJECTION: &str = r#"
@group(1) @binding(0) var history_color: texture_2d<f32>;
@group(1) @binding(1) var gbuffer_velocity: texture_2d<f32>;
@group(2) @binding(0) var history_sampler: sampler;

@fragment
fn fs_reproject(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(input.position.xy);
    let velocity = textureLoad(gbuffer_velocity, pixel, 0).xy;
    let prev_uv = input.uv - velocity;
    // Alpha 0 marks pixels with no history.
    if any(prev_uv < vec2<f32>(0.0)) || any(prev_uv > vec2<f32>(1.0)) {
        return vec4<f32>(0.0);
    }
    let history = textureSampleLevel(history_color, history_sampler, prev_uv, 0.0);
    return vec4<f32>(history.rgb, 1.0);
}
"#;

pub const TEMPORAL_RESOLVE: &str = r#"
struct TemporalParams {
    history_blend: f32,
    history_valid: f32,
}

@group(0) @binding(1) var<uniform> temporal: TemporalParams;
@group(1) @binding(0) var current_color: texture_2d<f32>;
@group(1) @binding(1) var reprojected_color: texture_2d<f32>;

@fragment
fn fs_temporal(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(input.position.xy);
    let last = vec2<i32>(textureDimensions(current_color)) - vec2<i32>(1, 1);
    let current = textureLoad(current_color, pixel, 0);

    // Neighbourhood clamp against ghosting
    var low = current.rgb;
    var high = current.rgb;
    for (var y: i32 = -1; y <= 1; y = y + 1) {
        for (var x: i32 = -1; x <= 1; x = x + 1) {
            let coord = clamp(pixel + vec2<i32>(x, y), vec2<i32>(0, 0), last);
            let neighbour = textureLoad(current_color, coord, 0).rgb;
            low = min(low, neighbour);
            high = max(high, neighbour);
        }
    }

    let history = textureLoad(reprojected_color, pixel, 0);
    if temporal.history_valid < 0.5 || history.a < 0.5 {
        return vec4<f32>(current.rgb, 1.0);
    }
    let clamped = clamp(history.rgb, low, high);
    return vec4<f32>(mix(clamped, current.rgb, vec3<f32>(temporal.history_blend)), 1.0);
}
"#;

pub const PRESENT: &str = r#"
struct PresentParams {
    // 0 = color, 1 = velocity, 2 = depth
    present_mode: u32,
}

@group(0) @binding(1) var<uniform> present: PresentParams;
@group(1) @binding(0) var source_color: texture_2d<f32>;
@group(1) @binding(1) var source_depth: texture_depth_2d;

@fragment
fn fs_present(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(input.position.xy);
    if present.present_mode == 1u {
        let velocity = textureLoad(source_color, pixel, 0).xy;
        return vec4<f32>(abs(velocity) * 32.0, 0.0, 1.0);
    }
    if present.present_mode == 2u {
        let depth = textureLoad(source_depth, pixel, 0);
        let shade = clamp((1.0 - depth) * 16.0, 0.0, 1.0);
        return vec4<f32>(vec3<f32>(shade), 1.0);
    }
    return textureLoad(source_color, pixel, 0);
}
"#;

pub const WIREFRAME: &str = r#"
struct WireParams {
    wire_color: vec4<f32>,
}

@group(0) @binding(2) var<uniform> wire: WireParams;

@vertex
fn vs_wire(input: VertexInput) -> @builtin(position) vec4<f32> {
    return camera.view_proj_jittered * object.world * vec4<f32>(input.position, 1.0);
}

@fragment
fn fs_wire() -> @location(0) vec4<f32> {
    return wire.wire_color;
}
"#;

pub const DEPTH_ONLY: &str = r#"
@vertex
fn vs_depth(input: VertexInput) -> @builtin(position) vec4<f32> {
    return camera.view_proj * object.world * vec4<f32>(input.position, 1.0);
}
"#;

pub const PATH_TRACE: &str = r#"
struct Triangle {
    v0: vec4<f32>,
    v1: vec4<f32>,
    v2: vec4<f32>,
    albedo: vec4<f32>,
    emission: vec4<f32>,
}

struct PathTraceParams {
    sample_index: u32,
    triangle_count: u32,
    area_light_count: u32,
    max_bounces: u32,
    environment_type: u32,
    // xyz = direction the sun light travels in, w = enabled
    sun_direction: vec4<f32>,
    sun_radiance: vec4<f32>,
}

@group(0) @binding(1) var<uniform> trace: PathTraceParams;
@group(1) @binding(0) var accumulation_in: texture_2d<f32>;
@group(1) @binding(1) var preview_depth: texture_depth_2d;
@group(3) @binding(0) var<storage, read> triangles: array<Triangle>;
@group(3) @binding(1) var<storage, read> area_lights: array<u32>;
@group(3) @binding(8) var accumulation_out: texture_storage_2d<rgba16float, write>;

const PI: f32 = 3.14159265;
const NO_HIT: u32 = 0xffffffffu;
const FAR_AWAY: f32 = 1e30;
const EPSILON: f32 = 1e-3;

struct Hit {
    distance: f32,
    index: u32,
    normal: vec3<f32>,
}

fn next_random(state: ptr<function, u32>) -> f32 {
    let old = *state;
    *state = old * 747796405u + 2891336453u;
    var word = ((old >> ((old >> 28u) + 4u)) ^ old) * 277803737u;
    word = (word >> 22u) ^ word;
    return f32(word) / 4294967295.0;
}

fn intersect(origin: vec3<f32>, direction: vec3<f32>, max_distance: f32) -> Hit {
    var hit: Hit;
    hit.distance = max_distance;
    hit.index = NO_HIT;
    for (var i = 0u; i < trace.triangle_count; i = i + 1u) {
        let tri = triangles[i];
        let edge1 = tri.v1.xyz - tri.v0.xyz;
        let edge2 = tri.v2.xyz - tri.v0.xyz;
        let p = cross(direction, edge2);
        let det = dot(edge1, p);
        if abs(det) < 1e-8 {
            continue;
        }
        let inv_det = 1.0 / det;
        let s = origin - tri.v0.xyz;
        let u = dot(s, p) * inv_det;
        if u < 0.0 || u > 1.0 {
            continue;
        }
        let q = cross(s, edge1);
        let v = dot(direction, q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            continue;
        }
        let t = dot(edge2, q) * inv_det;
        if t > 1e-4 && t < hit.distance {
            hit.distance = t;
            hit.index = i;
            hit.normal = normalize(cross(edge1, edge2));
        }
    }
    return hit;
}

fn sample_hemisphere(normal: vec3<f32>, state: ptr<function, u32>) -> vec3<f32> {
    let r1 = next_random(state);
    let r2 = next_random(state);
    let phi = 2.0 * PI * r1;
    let radius = sqrt(r2);
    let local = vec3<f32>(radius * cos(phi), radius * sin(phi), sqrt(max(1.0 - r2, 0.0)));
    let helper = select(vec3<f32>(1.0, 0.0, 0.0), vec3<f32>(0.0, 1.0, 0.0), abs(normal.x) > 0.9);
    let tangent = normalize(cross(helper, normal));
    let bitangent = cross(normal, tangent);
    return normalize(tangent * local.x + bitangent * local.y + normal * local.z);
}

fn sample_sun(position: vec3<f32>, normal: vec3<f32>) -> vec3<f32> {
    if trace.sun_direction.w < 0.5 {
        return vec3<f32>(0.0);
    }
    let direction = -normalize(trace.sun_direction.xyz);
    let cos_surface = dot(normal, direction);
    if cos_surface <= 0.0 {
        return vec3<f32>(0.0);
    }
    let blocker = intersect(position + normal * EPSILON, direction, FAR_AWAY);
    if blocker.index != NO_HIT {
        return vec3<f32>(0.0);
    }
    return trace.sun_radiance.rgb * cos_surface / PI;
}

fn sample_area_lights(position: vec3<f32>, normal: vec3<f32>, state: ptr<function, u32>) -> vec3<f32> {
    let count = trace.area_light_count;
    if count == 0u {
        return vec3<f32>(0.0);
    }
    let pick = min(u32(next_random(state) * f32(count)), count - 1u);
    let emitter = triangles[area_lights[pick]];
    var a = next_random(state);
    var b = next_random(state);
    if a + b > 1.0 {
        a = 1.0 - a;
        b = 1.0 - b;
    }
    let edge1 = emitter.v1.xyz - emitter.v0.xyz;
    let edge2 = emitter.v2.xyz - emitter.v0.xyz;
    let on_light = emitter.v0.xyz + edge1 * a + edge2 * b;
    let to_light = on_light - position;
    let distance = length(to_light);
    if distance < EPSILON {
        return vec3<f32>(0.0);
    }
    let direction = to_light / distance;
    let cos_surface = dot(normal, direction);
    if cos_surface <= 0.0 {
        return vec3<f32>(0.0);
    }
    let light_cross = cross(edge1, edge2);
    let area = 0.5 * length(light_cross);
    let cos_light = abs(dot(normalize(light_cross), direction));
    let blocker = intersect(position + normal * EPSILON, direction, distance - EPSILON);
    if blocker.index != NO_HIT {
        return vec3<f32>(0.0);
    }
    let weight = f32(count) * area * cos_surface * cos_light / (distance * distance * PI);
    return emitter.emission.rgb * weight;
}

fn trace_path(ray_origin: vec3<f32>, ray_direction: vec3<f32>, state: ptr<function, u32>) -> vec3<f32> {
    var origin = ray_origin;
    var direction = ray_direction;
    var throughput = vec3<f32>(1.0);
    var radiance = vec3<f32>(0.0);
    for (var bounce = 0u; bounce <= trace.max_bounces; bounce = bounce + 1u) {
        let hit = intersect(origin, direction, FAR_AWAY);
        if hit.index == NO_HIT {
            radiance = radiance + throughput * environment_radiance(direction, trace.environment_type);
            break;
        }
        let tri = triangles[hit.index];
        // Emitters seen through a bounce are covered by light sampling.
        if bounce == 0u {
            radiance = radiance + tri.emission.rgb;
        }
        var normal = hit.normal;
        if dot(normal, direction) > 0.0 {
            normal = -normal;
        }
        let position = origin + direction * hit.distance;
        let albedo = tri.albedo.rgb;
        let direct = sample_sun(position, normal) + sample_area_lights(position, normal, state);
        radiance = radiance + throughput * albedo * direct;
        throughput = throughput * albedo;
        origin = position + normal * EPSILON;
        direction = sample_hemisphere(normal, state);
    }
    return radiance;
}

@compute @workgroup_size(8, 8, 1)
fn cs_path_trace(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(accumulation_out);
    if id.x >= size.x || id.y >= size.y {
        return;
    }
    let pixel = vec2<i32>(id.xy);
    var state = (id.x * 1973u + id.y * 9277u + trace.sample_index * 26699u) | 1u;
    let offset = vec2<f32>(next_random(&state), next_random(&state));
    let uv = (vec2<f32>(id.xy) + offset) / vec2<f32>(size);
    let ndc = vec2<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0);
    let near_point = camera.inv_view_proj * vec4<f32>(ndc, 0.0, 1.0);
    let far_point = camera.inv_view_proj * vec4<f32>(ndc, 1.0, 1.0);
    let origin = near_point.xyz / near_point.w;
    let direction = normalize(far_point.xyz / far_point.w - origin);

    var radiance: vec3<f32>;
    if textureLoad(preview_depth, pixel, 0) >= 1.0 {
        radiance = environment_radiance(direction, trace.environment_type);
    } else {
        radiance = trace_path(origin, direction, &state);
    }

    var mean = radiance;
    if trace.sample_index > 0u {
        let previous = textureLoad(accumulation_in, pixel, 0).rgb;
        mean = mix(previous, radiance, vec3<f32>(1.0 / f32(trace.sample_index + 1u)));
    }
    textureStore(accumulation_out, pixel, vec4<f32>(mean, 1.0));
}
"#;

pub const TONE_MAP: &str = r#"
struct ToneMapParams {
    exposure: f32,
}

@group(0) @binding(1) var<uniform> tone_map: ToneMapParams;
@group(1) @binding(0) var hdr_color: texture_2d<f32>;

@fragment
fn fs_tone_map(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let color = textureLoad(hdr_color, vec2<i32>(input.position.xy), 0).rgb * tone_map.exposure;
    return vec4<f32>(color / (vec3<f32>(1.0) + color), 1.0);
}
"#;

/// Concatenate snippets into one program source.
pub fn program(parts: &[&str]) -> String {
    parts.concat()
}

/// Composite program for one environment type
pub fn composite_variant(env_type: u32) -> String {
    let prefix = format!("const ENV_TYPE: u32 = {env_type}u;\n");
    program(&[&prefix, VIEW_PARAMS, ENVIRONMENT, FULLSCREEN, COMPOSITE])
}
