//! template_cache.rs — C++ function template instantiation cache (spec §4.6).
//!
//! For every distinct `(function-name, domain, template-args, return-type,
//! arg-types)` tuple the sequencer needs, this cache assigns a stable
//! C-linkage symbol and accumulates the wrapper source text that invokes
//! the templated function. Looking up an already-seen tuple returns the
//! existing symbol and appends no new source — property 8 of spec §8.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::dtype::TypeName;

/// Which generated source file a wrapper belongs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Kernel,
    Host,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    pub function_name: String,
    pub domain: Domain,
    pub template_args: Vec<String>,
    pub return_type: TypeName,
    pub arg_types: Vec<TypeName>,
}

/// Accumulates generated wrapper source and the instance->symbol map for
/// one recipe build. Scoped to a single build, per spec §5 ("the
/// template-instantiation cache is scoped to a single recipe build, not
/// global").
#[derive(Debug, Default)]
pub struct TemplateCache {
    symbols: HashMap<TemplateKey, String>,
    next_id: u32,
    kernel_source: String,
    host_source: String,
}

impl TemplateCache {
    pub fn new() -> Self {
        TemplateCache::default()
    }

    /// Look up or create the C-linkage symbol for `key`, appending wrapper
    /// source the first time this exact tuple is requested.
    pub fn instantiate(&mut self, key: TemplateKey) -> String {
        if let Some(existing) = self.symbols.get(&key) {
            return existing.clone();
        }
        let symbol = format!("{}_{}", key.function_name, self.next_id);
        self.next_id += 1;
        self.emit_wrapper(&key, &symbol);
        self.symbols.insert(key, symbol.clone());
        symbol
    }

    fn emit_wrapper(&mut self, key: &TemplateKey, symbol: &str) {
        let template_args = key.template_args.join(", ");
        let arg_list: Vec<String> = key
            .arg_types
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{} arg{i}", t.cpp_name()))
            .collect();
        let call_args: Vec<String> = (0..key.arg_types.len()).map(|i| format!("arg{i}")).collect();
        let return_type = key.return_type.cpp_name();

        let buf = match key.domain {
            Domain::Kernel => &mut self.kernel_source,
            Domain::Host => &mut self.host_source,
        };
        let qualifier = match key.domain {
            Domain::Kernel => "__global__",
            Domain::Host => "extern \"C\"",
        };
        let _ = writeln!(
            buf,
            "{qualifier} {return_type} {symbol}({args}) {{\n    PIPIT_TRACE(\"{symbol}\");\n    return {func}<{targs}>({cargs});\n}}\n",
            args = arg_list.join(", "),
            func = key.function_name,
            targs = template_args,
            cargs = call_args.join(", "),
        );
    }

    pub fn kernel_source(&self) -> &str {
        &self.kernel_source
    }

    pub fn host_source(&self) -> &str {
        &self.host_source
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
