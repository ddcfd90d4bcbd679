//! WebAssembly bindings for Veil
//!
//! The host compiles lists once, then hands the compiled buffer to
//! [`init`]. Calling [`init`] again swaps in a new engine; queries already
//! running keep the engine they started with.

use std::sync::{Arc, OnceLock};

use veil_compiler::{compile_filter_lists as compile_lists, read_compiled};
use veil_core::psl::is_same_or_subdomain;
use veil_core::url::extract_host;
use veil_core::{DomainResolver, EngineBuilder, EngineConfig, EngineHandle, FilteringEngine};
use wasm_bindgen::prelude::*;

static ENGINE: OnceLock<EngineHandle> = OnceLock::new();
static RESOLVER: OnceLock<Arc<DomainResolver>> = OnceLock::new();

fn resolver() -> Arc<DomainResolver> {
    RESOLVER.get_or_init(|| Arc::new(DomainResolver::new())).clone()
}

fn load_engine(compiled: &str, dynamic_rules: Option<&str>) -> Result<FilteringEngine, String> {
    let mut builder = EngineBuilder::new(EngineConfig::default(), resolver());
    read_compiled(compiled, |rec| {
        builder.add_record(&rec);
    })
    .map_err(|e| format!("Failed to load compiled filters: {}", e))?;
    if let Some(text) = dynamic_rules {
        builder
            .add_dynamic_rules(text)
            .map_err(|e| format!("Failed to load dynamic rules: {}", e))?;
    }
    Ok(builder.build())
}

fn set(target: &js_sys::Object, key: &str, value: &JsValue) {
    let _ = js_sys::Reflect::set(target, &key.into(), value);
}

fn string_array<S: AsRef<str>>(values: &[S]) -> js_sys::Array {
    let array = js_sys::Array::new();
    for value in values {
        array.push(&JsValue::from_str(value.as_ref()));
    }
    array
}

/// Load (or reload) the engine from a compiled buffer and optional
/// `src des type action` dynamic rules.
#[wasm_bindgen]
pub fn init(compiled: &str, dynamic_rules: Option<String>) -> Result<(), JsValue> {
    let engine = load_engine(compiled, dynamic_rules.as_deref()).map_err(|e| JsValue::from_str(&e))?;

    if let Some(handle) = ENGINE.get() {
        let old = handle.replace(engine);
        web_sys::console::debug_1(&JsValue::from_str(&format!(
            "veil: engine reloaded ({} network filters before)",
            old.stats().network.accepted
        )));
        return Ok(());
    }

    ENGINE
        .set(EngineHandle::new(engine))
        .map_err(|_| JsValue::from_str("Failed to set engine state"))
}

#[wasm_bindgen]
pub fn is_initialized() -> bool {
    ENGINE.get().is_some()
}

#[wasm_bindgen]
pub fn get_engine_info() -> JsValue {
    let result = js_sys::Object::new();
    match ENGINE.get() {
        Some(handle) => {
            let stats = handle.current().stats();
            set(&result, "initialized", &JsValue::from(true));
            set(&result, "networkFilters", &JsValue::from(stats.network.accepted as u32));
            set(&result, "cosmeticFilters", &JsValue::from(stats.cosmetic.accepted as u32));
            set(&result, "dynamicPairs", &JsValue::from(stats.dynamic_pairs as u32));
        }
        None => set(&result, "initialized", &JsValue::from(false)),
    }
    result.into()
}

#[wasm_bindgen]
pub fn compile_filter_lists(list_texts: JsValue) -> Result<JsValue, JsValue> {
    let list_array = js_sys::Array::from(&list_texts);
    if list_array.length() == 0 {
        return Err(JsValue::from_str("No list texts provided"));
    }

    let mut texts = Vec::with_capacity(list_array.length() as usize);
    for value in list_array.iter() {
        let text = value
            .as_string()
            .ok_or_else(|| JsValue::from_str("List text must be a string"))?;
        texts.push(text);
    }

    let (compiled, report) = compile_lists(&texts);

    let js_result = js_sys::Object::new();
    set(&js_result, "compiled", &JsValue::from_str(&compiled));
    set(&js_result, "lines", &JsValue::from(report.parse.lines as u32));
    set(&js_result, "rejected", &JsValue::from(report.parse.rejected as u32));
    set(&js_result, "rulesBefore", &JsValue::from(report.optimize.before as u32));
    set(&js_result, "rulesAfter", &JsValue::from(report.optimize.after as u32));
    set(&js_result, "rulesDeduped", &JsValue::from(report.optimize.deduped as u32));
    set(&js_result, "badfilterRules", &JsValue::from(report.optimize.badfilter_rules as u32));
    set(&js_result, "badfilteredRules", &JsValue::from(report.optimize.badfiltered_rules as u32));
    Ok(js_result.into())
}

/// Verdict for a request. `page_url` is the document issuing it; without
/// one the request counts as first party.
#[wasm_bindgen]
pub fn match_request(url: &str, request_type: &str, page_url: Option<String>, verbose: bool) -> JsValue {
    let js_result = js_sys::Object::new();
    let Some(handle) = ENGINE.get() else {
        set(&js_result, "result", &JsValue::from_str(""));
        set(&js_result, "blocked", &JsValue::from(false));
        return js_result.into();
    };

    let engine = handle.current();
    let result = engine.match_url(url, page_url.as_deref().unwrap_or(""), request_type);

    set(&js_result, "result", &JsValue::from_str(&result.to_result_string(verbose)));
    set(&js_result, "blocked", &JsValue::from(result.is_blocked()));
    set(&js_result, "allowed", &JsValue::from(result.is_allowed()));
    set(&js_result, "important", &JsValue::from(result.is_important()));
    if result.is_match() {
        set(&js_result, "filter", &JsValue::from_str(&result.filter));
    }
    js_result.into()
}

#[wasm_bindgen]
pub fn should_block(url: &str, request_type: &str, page_url: Option<String>) -> bool {
    match ENGINE.get() {
        Some(handle) => handle
            .current()
            .match_url(url, page_url.as_deref().unwrap_or(""), request_type)
            .is_blocked(),
        None => false,
    }
}

/// Selectors for the page at `location_url`. `null` when cosmetic
/// filtering is off for the page.
#[wasm_bindgen]
pub fn retrieve_domain_selectors(location_url: &str) -> JsValue {
    let Some(handle) = ENGINE.get() else {
        return JsValue::NULL;
    };
    let engine = handle.current();
    let page = engine.new_page(location_url);
    let Some(selectors) = engine.cosmetic_selectors(&page) else {
        return JsValue::NULL;
    };

    let js_result = js_sys::Object::new();
    set(&js_result, "hostname", &JsValue::from_str(&selectors.hostname));
    set(&js_result, "domain", &JsValue::from_str(&selectors.domain));
    set(&js_result, "entity", &JsValue::from_str(&selectors.entity));
    set(&js_result, "hide", &string_array(&selectors.hide));
    set(&js_result, "donthide", &string_array(&selectors.donthide));
    set(&js_result, "lowGenerics", &string_array(selectors.low_generics));
    set(&js_result, "highGenerics", &string_array(selectors.high_generics));
    js_result.into()
}

/// Generic selectors matching the ids and classes (`#id`, `.class`) seen
/// in the page.
#[wasm_bindgen]
pub fn retrieve_generic_selectors(candidates: JsValue) -> JsValue {
    let js_result = js_sys::Object::new();
    let candidates: Vec<String> = js_sys::Array::from(&candidates)
        .iter()
        .filter_map(|value| value.as_string())
        .collect();

    let (hide, donthide) = match ENGINE.get() {
        Some(handle) => {
            let selectors = handle.current().generic_selectors(&candidates);
            (selectors.hide, selectors.donthide)
        }
        None => (Vec::new(), Vec::new()),
    };
    set(&js_result, "hide", &string_array(&hide));
    set(&js_result, "donthide", &string_array(&donthide));
    js_result.into()
}

#[wasm_bindgen]
pub fn domain_from_hostname_js(hostname: &str) -> String {
    resolver().domain_from_hostname(hostname)
}

#[wasm_bindgen]
pub fn is_third_party_js(page_hostname: &str, request_hostname: &str) -> bool {
    let page_domain = resolver().domain_from_hostname(page_hostname);
    !page_domain.is_empty() && !is_same_or_subdomain(request_hostname, &page_domain)
}

#[wasm_bindgen]
pub fn extract_host_js(url: &str) -> Option<String> {
    extract_host(url).map(|h| h.to_string())
}
