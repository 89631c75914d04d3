//! The RNA expression evaluator.
//!
//! RNA is evaluated online: the cursor walks the expression mutating a
//! value buffer and a truth bit in the context of an active neuron and an
//! active gene. Sigils select storage (`!` property, `%` local, `#` index
//! trait, `;` short term), `@` switches neuron, `$` switches gene, `.op`
//! applies registered operators or macros, `?:` is the ternary.
use crate::neuron::Neuron;
use crate::scope::Scope;
use crate::trace::error_report;
use std::mem;
use xepl_core::parse::ParserBag;
use xepl_core::Gene;

/// Evaluate `expr`, returning the value and the truth bit.
pub fn eval(scope: &mut Scope, neuron: &Neuron, gene: Option<&Gene>, expr: &str) -> (String, bool) {
    eval_seeded(scope, neuron, gene, expr, "", false)
}

/// Evaluate with a seed value and an incoming truth bit (macros and the
/// conditional keywords use this).
pub fn eval_seeded(
    scope: &mut Scope,
    neuron: &Neuron,
    gene: Option<&Gene>,
    expr: &str,
    seed: &str,
    truth: bool,
) -> (String, bool) {
    let mut script = Script {
        scope,
        neuron: neuron.clone(),
        gene: gene.cloned(),
        value: seed.to_string(),
        truth,
        bag: ParserBag::new(expr),
    };
    while !script.bag.failed() && script.get_next_value() {}
    script.report_errors(expr);
    (script.value, script.truth)
}

/// Evaluate a gene's content as RNA with the gene itself active.
pub fn run_gene(scope: &mut Scope, neuron: &Neuron, gene: &Gene) {
    if let Some(content) = gene.content_string() {
        eval(scope, neuron, Some(gene), &content);
    }
}

/// Replace each `{`-prefixed trait value with its evaluation.
pub fn evaluate_traits(scope: &mut Scope, neuron: &Neuron, gene: &Gene) {
    for (name, value) in gene.traits_snapshot() {
        if value.starts_with('{') {
            let (result, _) = eval(scope, neuron, Some(gene), &value);
            gene.trait_set(&name, &result);
        }
    }
}

/// The `{{ … }}` pre-pass: evaluate embedded scripts in place, preserving
/// the surrounding text verbatim. One linear scan; scripted output is not
/// rescanned.
pub fn evaluate_inner_scripts(
    scope: &mut Scope,
    neuron: &Neuron,
    gene: Option<&Gene>,
    text: &str,
    into: &mut String,
) {
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let Some(close) = rest[start + 2..].find("}}") else {
            break;
        };
        into.push_str(&rest[..start]);
        let inner = &rest[start + 2..start + 2 + close];
        let (value, _) = eval(scope, neuron, gene, inner);
        into.push_str(&value);
        rest = &rest[start + 2 + close + 2..];
    }
    into.push_str(rest);
}

fn starts_tag(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

fn in_tag(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

/// One evaluation in flight. Operators receive it mutably and rewrite
/// `value` and `truth`.
pub struct Script<'s, 't> {
    pub scope: &'s mut Scope,
    pub neuron: Neuron,
    pub gene: Option<Gene>,
    pub value: String,
    pub truth: bool,
    bag: ParserBag<'t>,
}

impl Script<'_, '_> {
    /// Record an evaluation error at the current position; the statement
    /// aborts there.
    pub fn fail(&mut self, reason: &str, explain: &str) {
        self.bag.record_error(reason, explain);
    }

    fn get_next_value(&mut self) -> bool {
        if self.bag.peek() != 0 && self.extract_value() && self.bag.peek() != 0 && !self.bag.failed()
        {
            self.mutate_value();
            self.bag.skip_whitespace();
            return true;
        }
        false
    }

    fn extract_value(&mut self) -> bool {
        match self.bag.peek() {
            b' ' | b'\t' | b'\n' | b'\r' => {
                self.bag.skip_whitespace();
                self.extract_value()
            }
            b'\'' | b'`' | b'"' => {
                self.pull_string();
                true
            }
            b'$' => {
                self.bag.advance();
                self.change_gene();
                true
            }
            b'.' => {
                self.mutate_value();
                true
            }
            b'{' => {
                self.bag.advance();
                self.enter_inner_block();
                true
            }
            b'@' => {
                self.bag.advance();
                self.process_neuron();
                true
            }
            b'!' | b'%' | b'#' | b';' => {
                self.tap_term();
                true
            }
            b'?' => {
                self.bag.advance();
                self.ternary_choice();
                true
            }
            b')' | b'}' | 0 => false,
            _ => {
                if self.get_property() {
                    return true;
                }
                if self.pull_number() {
                    return true;
                }
                self.bag.record_error_here("unexpected character");
                false
            }
        }
    }

    /// `.op(arg?)` chains: registered operator first, then neuron macros.
    fn mutate_value(&mut self) {
        while self.bag.consume(b'.') {
            let opcode = self.pull_tag();
            let mut param: Option<String> = None;
            if self.bag.consume(b'(') {
                param = Some(self.extract_parameter());
                self.bag.expect(b')');
            }
            let cortex = self.scope.cortex_handle();
            if cortex.did_operator(&opcode, self, param.as_deref()) {
                continue;
            }
            if self.do_macro(&opcode, param.as_deref()) {
                continue;
            }
            self.bag.record_error("operator/macro not found", opcode);
            return;
        }
    }

    /// A macro runs as a nested evaluation seeded with the current value;
    /// `_` binds the seed, `__` the parameter.
    fn do_macro(&mut self, opcode: &str, param: Option<&str>) -> bool {
        let Some(expansion) = self.neuron.macro_hunt(opcode) else {
            return false;
        };
        let neuron = self.neuron.clone();
        let seed = self.value.clone();
        self.scope.push_frame();
        self.scope.term_set("_", &seed);
        if let Some(param) = param {
            self.scope.term_set("__", param);
        }
        let (value, truth) = eval_seeded(self.scope, &neuron, None, &expansion, &seed, self.truth);
        self.scope.pop_frame();
        self.value = value;
        self.truth = truth;
        true
    }

    /// Evaluate an operator argument into a fresh value buffer.
    fn extract_parameter(&mut self) -> String {
        let saved = mem::take(&mut self.value);
        self.get_next_value();
        mem::replace(&mut self.value, saved)
    }

    /// `{ … }`: nested expression, last value wins.
    fn enter_inner_block(&mut self) {
        while !self.bag.failed() && self.extract_value() {}
        if !self.bag.failed() && self.bag.expect(b'}') && self.bag.peek() != 0 {
            self.bag.skip_whitespace();
        }
    }

    /// Navigate within `target` for the duration of the following steps;
    /// the previously active gene is restored afterwards.
    fn process_gene(&mut self, target: Gene) {
        let previous = self.gene.replace(target);
        self.process_gene_steps();
        self.gene = previous;
    }

    fn process_gene_steps(&mut self) {
        match self.bag.peek() {
            b' ' | b'\t' | b'\n' | b'\r' => {
                self.bag.skip_whitespace();
                self.process_gene_steps();
            }
            b'.' => {
                while self.bag.peek() == b'.' {
                    self.mutate_value();
                    if self.bag.failed() {
                        return;
                    }
                }
                self.process_gene_steps();
            }
            b'>' => {
                self.bag.advance();
                self.serialize();
            }
            b'/' => {
                self.bag.advance();
                self.enter_child_gene();
            }
            b'\'' => self.select_attribute(),
            b'|' => {
                self.bag.advance();
                self.declare_content();
            }
            _ => {}
        }
    }

    /// `$name` / `$123` / `$*expr` / `$$` / bare `$`: pick the gene to
    /// navigate and push it as the index for the nested steps.
    fn change_gene(&mut self) {
        let peek = self.bag.peek();
        let target: Option<Gene> = if starts_tag(peek) {
            let tag = self.pull_tag();
            let cortex = self.scope.cortex_handle();
            let neuron = self.neuron.clone();
            cortex.locate_gene(self.scope, &neuron, &tag)
        } else if peek.is_ascii_digit() {
            let depth: usize = self
                .bag
                .take_while(|b| b.is_ascii_digit())
                .parse()
                .unwrap_or(0);
            self.scope.index(depth)
        } else if self.bag.consume(b'*') {
            let saved = mem::take(&mut self.value);
            self.extract_value();
            let name = mem::replace(&mut self.value, saved);
            let cortex = self.scope.cortex_handle();
            let neuron = self.neuron.clone();
            cortex.locate_gene(self.scope, &neuron, &name)
        } else if self.bag.consume(b'$') {
            self.scope.outdex_link()
        } else {
            self.scope.index_link()
        };
        match target {
            Some(target) => {
                self.scope.push_index(target.clone());
                self.process_gene(target);
                self.scope.pop_index();
            }
            None => self.bag.record_error_here("gene/index not found"),
        }
    }

    /// `'attr'`: read, `'attr'=`: assign, `''`: the gene's name.
    fn select_attribute(&mut self) {
        let quote = self.bag.peek();
        self.bag.advance();
        let tag = self.pull_tag();
        self.bag.expect(quote);
        let Some(gene) = self.gene.clone() else {
            self.bag.record_error_here("no active gene");
            return;
        };
        if tag.is_empty() {
            self.value.clear();
            self.value.push_str(gene.name());
            return;
        }
        if self.bag.consume(b'=') {
            self.get_next_value();
            gene.trait_set(&tag, &self.value);
            return;
        }
        match gene.trait_get(&tag) {
            Some(value) => {
                self.value.clear();
                self.value.push_str(&value);
                self.truth = true;
            }
            None => self.truth = false,
        }
    }

    /// `|`: read content, `|=`: assign, `|+`: append then read back.
    fn declare_content(&mut self) {
        let Some(gene) = self.gene.clone() else {
            self.bag.record_error_here("no active gene");
            return;
        };
        let next = self.bag.peek();
        if next != b'=' && next != b'+' {
            gene.copy_content(&mut self.value);
            return;
        }
        let append = next == b'+';
        self.bag.advance();
        self.bag.skip_whitespace();
        self.get_next_value();
        if !append {
            gene.assign_content(&self.value);
            return;
        }
        gene.append_content(&self.value);
        self.value.clear();
        gene.copy_content(&mut self.value);
    }

    /// `/tag` (or `/{expr}`): step into the eldest child of that name.
    fn enter_child_gene(&mut self) {
        let tag = if self.bag.consume(b'{') {
            self.enter_inner_block();
            let tag = self.value.clone();
            self.value.clear();
            tag
        } else {
            self.pull_tag()
        };
        let Some(gene) = self.gene.clone() else {
            self.bag.record_error_here("no active gene");
            return;
        };
        match gene.get_first(&tag) {
            Some(child) => {
                self.scope.push_index(child.clone());
                self.process_gene(child);
                self.scope.pop_index();
            }
            None => self.bag.record_error("child gene not found", tag),
        }
    }

    /// `>`…: serialize the active gene; extra `>`s shrink the depth.
    fn serialize(&mut self) {
        let mut depth = 0i32;
        while self.bag.consume(b'>') {
            depth += 1;
        }
        if let Some(gene) = &self.gene {
            gene.print_into(&mut self.value, depth);
        }
    }

    /// `@…`: switch the active neuron, extract a property/feature of it,
    /// or hand off to gene navigation.
    fn process_neuron(&mut self) {
        match self.bag.peek() {
            b'"' => self.extract_property(),
            b'`' => self.extract_feature(),
            b'$' => {
                self.bag.advance();
                self.change_gene();
            }
            _ => {
                let tag = self.pull_tag();
                if let Some(found) = self.neuron.find_neuron(&tag) {
                    let previous = mem::replace(&mut self.neuron, found);
                    self.process_neuron();
                    self.neuron = previous;
                }
            }
        }
        if self.bag.peek() == b'.' {
            self.mutate_value();
        }
    }

    fn extract_property(&mut self) {
        let quote = self.bag.peek();
        self.bag.advance();
        let tag = self.pull_tag();
        self.bag.expect(quote);
        let mut found = String::new();
        self.truth = self.neuron.property_hunt(&tag, &mut found);
        if self.truth {
            self.value = found;
        }
    }

    fn extract_feature(&mut self) {
        let quote = self.bag.peek();
        self.bag.advance();
        let tag = self.pull_tag();
        self.bag.expect(quote);
        let neuron = self.neuron.clone();
        self.truth = neuron.feature_get(&tag, &mut self.value);
    }

    /// `!` `%` `#` `;` taps: read, or assign when `=` follows.
    fn tap_term(&mut self) {
        let tip = self.bag.peek();
        self.bag.advance();
        let tag = self.pull_tag();
        let assigned = if self.bag.consume(b'=') {
            self.value.clear();
            self.get_next_value();
            Some(self.value.clone())
        } else {
            None
        };
        match tip {
            b'!' => self.tap_property(&tag, assigned),
            b'%' => self.tap_local(&tag, assigned),
            b'#' => self.tap_index(&tag, assigned),
            b';' => self.tap_short_term(&tag, assigned),
            _ => unreachable!("tap dispatched on a known sigil"),
        }
    }

    fn tap_property(&mut self, tag: &str, assigned: Option<String>) {
        if let Some(value) = assigned {
            self.neuron.property_set(tag, &value);
            return;
        }
        let mut found = String::new();
        if self.neuron.property_get(tag, &mut found) {
            self.value = found;
        } else {
            self.value.clear();
        }
    }

    fn tap_local(&mut self, tag: &str, assigned: Option<String>) {
        if let Some(value) = assigned {
            self.scope.make_locals().trait_set(tag, &value);
            return;
        }
        match self.scope.local_get(tag) {
            Some(value) => self.value = value,
            None => self.value.clear(),
        }
    }

    fn tap_index(&mut self, tag: &str, assigned: Option<String>) {
        let Some(gene) = self.gene.clone() else {
            self.value.clear();
            return;
        };
        if let Some(value) = assigned {
            gene.trait_set(tag, &value);
            return;
        }
        match gene.trait_get(tag) {
            Some(value) => self.value = value,
            None => self.value.clear(),
        }
    }

    fn tap_short_term(&mut self, tag: &str, assigned: Option<String>) {
        if let Some(value) = assigned {
            self.scope.term_set(tag, &value);
            return;
        }
        match self.scope.term_get(tag) {
            Some(value) => self.value = value,
            None => self.value.clear(),
        }
    }

    /// `?then:else`, gated by the truth bit. Both branches are consumed;
    /// the unchosen branch leaves value and truth untouched.
    fn ternary_choice(&mut self) {
        self.bag.skip_whitespace();
        let was_truth = self.truth;
        let mut return_truth = self.truth;
        let mut result_value = String::new();
        let previous_value = self.value.clone();
        if self.bag.peek() != b':' {
            self.get_next_value();
            if was_truth {
                return_truth = self.truth;
                result_value = self.value.clone();
            } else {
                self.value = previous_value.clone();
            }
        }
        if self.bag.consume(b':') {
            self.value = previous_value;
            self.get_next_value();
            if was_truth {
                self.truth = return_truth;
                self.value = result_value;
            }
        }
    }

    /// Bare name: the property hunt. With a leading `*`, the found value is
    /// itself resolved as a name.
    fn get_property(&mut self) -> bool {
        let indirection = self.bag.consume(b'*');
        if !starts_tag(self.bag.peek()) {
            return false;
        }
        let tag = self.pull_tag();
        let mut found = self.hunt_property(&tag);
        if found && indirection {
            let name = self.value.clone();
            found = self.hunt_property(&name);
        }
        found
    }

    /// Resolution order: short terms, locals, neuron properties up the
    /// parent chain. Unresolved names are an error (and still end the
    /// token, so number parsing does not reinterpret them).
    fn hunt_property(&mut self, tag: &str) -> bool {
        if tag.is_empty() {
            return false;
        }
        if let Some(value) = self.scope.term_get(tag) {
            self.value = value;
            return true;
        }
        if let Some(value) = self.scope.local_get(tag) {
            self.value = value;
            return true;
        }
        let mut found = String::new();
        if self.neuron.property_hunt(tag, &mut found) {
            self.value = found;
            return true;
        }
        self.bag.record_error("can't find trait", tag);
        true
    }

    /// Tag lexeme, with `*` indirection.
    fn pull_tag(&mut self) -> String {
        self.bag.skip_whitespace();
        let tag = if self.bag.consume(b'*') {
            let saved = self.value.clone();
            let tag = if self.get_property() {
                self.value.clone()
            } else {
                String::new()
            };
            self.value = saved;
            tag
        } else {
            self.bag.take_while(in_tag).to_string()
        };
        self.bag.skip_whitespace();
        tag
    }

    fn pull_number(&mut self) -> bool {
        let rest = self.bag.rest().as_bytes();
        let mut len = 0;
        if rest.first() == Some(&b'-') {
            if !rest.get(1).map_or(false, u8::is_ascii_digit) {
                return false;
            }
            len = 1;
        }
        if !rest.get(len).map_or(false, u8::is_ascii_digit) {
            return false;
        }
        while rest.get(len).map_or(false, u8::is_ascii_digit) {
            len += 1;
        }
        if rest.get(len) == Some(&b'.') && rest.get(len + 1).map_or(false, u8::is_ascii_digit) {
            len += 2;
            while rest.get(len).map_or(false, u8::is_ascii_digit) {
                len += 1;
            }
        }
        let text = self.bag.rest()[..len].to_string();
        self.value = text;
        self.bag.bump(len);
        true
    }

    fn pull_string(&mut self) {
        let quote = self.bag.peek();
        self.bag.advance();
        match self.bag.rest().find(quote as char) {
            Some(at) => {
                let text = self.bag.rest()[..at].to_string();
                self.value = text;
                self.bag.bump(at + 1);
            }
            None => {
                let len = self.bag.remaining();
                self.value = self.bag.rest().to_string();
                self.bag.bump(len);
                self.bag.record_error("non-terminated string", "");
            }
        }
    }

    /// Surface the first recorded error with the source and a caret.
    fn report_errors(&mut self, expr: &str) {
        if let Some(error) = self.bag.take_error() {
            let offset = self.bag.offset();
            let mut message = format!("{error}\n{expr}");
            if offset < 128 {
                message.push('\n');
                message.push_str(&" ".repeat(offset));
                message.push('^');
            }
            error_report!("{message}");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cortex::{Brain, CortexConfig, Output};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn brain() -> (Brain, Arc<Mutex<String>>) {
        let _ = env_logger::try_init();
        let (output, sink) = Output::sink();
        let brain = Brain::new(
            CortexConfig::builder()
                .name("brain")
                .output(output)
                .build()
                .unwrap(),
        )
        .unwrap();
        (brain, sink)
    }

    #[test]
    fn space_operator_joins_strings() {
        let (mut brain, _) = brain();
        brain.register_operator("space", |script, rhs| {
            script.value.push(' ');
            if let Some(rhs) = rhs {
                script.value.push_str(rhs);
            }
            Ok(())
        });
        let value = brain.execute_rna("'Hello,'.space('World!')");
        assert_eq!(value, "Hello, World!");
    }

    #[test]
    fn literals_numbers_and_blocks() {
        let (mut brain, _) = brain();
        assert_eq!(brain.execute_rna("'quoted'"), "quoted");
        assert_eq!(brain.execute_rna("-12.5"), "-12.5");
        assert_eq!(brain.execute_rna("{'a' 'b'}"), "b");
    }

    #[test]
    fn short_terms_resolve_before_properties() {
        let (mut brain, _) = brain();
        let host = brain.cortex().host_neuron();
        host.property_set("who", "property");
        assert_eq!(brain.execute_rna("who"), "property");
        let scope = brain.scope();
        scope.term_set("who", "short-term");
        assert_eq!(brain.execute_rna("who"), "short-term");
    }

    #[test]
    fn local_taps_assign_and_read() {
        let (mut brain, _) = brain();
        brain.execute_rna("%count='42'");
        assert_eq!(brain.execute_rna("%count"), "42");
        brain.scope().close_dispatch();
        assert_eq!(brain.execute_rna("%count"), "");
    }

    #[test]
    fn index_taps_write_the_index_gene() {
        let (mut brain, _) = brain();
        brain.execute_rna("#mark='here'");
        let index = brain.scope().index_link().unwrap();
        assert_eq!(index.trait_get("mark").unwrap(), "here");
        assert_eq!(brain.execute_rna("#mark"), "here");
    }

    #[test]
    fn gene_navigation_reads_attributes_children_and_content() {
        let (mut brain, _) = brain();
        let index = brain.scope().index_link().unwrap();
        let child = Gene::new_in(&index, "child", None);
        child.trait_set("k", "v");
        child.assign_content("inner text");
        assert_eq!(brain.execute_rna("$/child'k'"), "v");
        assert_eq!(brain.execute_rna("$/child|"), "inner text");
    }

    #[test]
    fn attribute_assignment_writes_through() {
        let (mut brain, _) = brain();
        brain.execute_rna("$'set'='value'");
        let index = brain.scope().index_link().unwrap();
        assert_eq!(index.trait_get("set").unwrap(), "value");
    }

    #[test]
    fn ternary_follows_the_truth_bit() {
        let (mut brain, _) = brain();
        brain.register_operator("is", |script, rhs| {
            script.truth = rhs.map(|rhs| script.value == rhs).unwrap_or(false);
            Ok(())
        });
        assert_eq!(brain.execute_rna("'a'.is('a')?'yes':'no'"), "yes");
        assert_eq!(brain.execute_rna("'a'.is('b')?'yes':'no'"), "no");
    }

    #[test]
    fn macros_run_with_seed_and_parameter() {
        let (mut brain, _) = brain();
        let host = brain.cortex().host_neuron();
        brain.register_operator("append", |script, rhs| {
            if let Some(rhs) = rhs {
                script.value.push_str(rhs);
            }
            script.truth = !script.value.is_empty();
            Ok(())
        });
        host.register_macro("shout", ";_.append('!').append(;__)");
        assert_eq!(brain.execute_rna("'hey'.shout('?')"), "hey!?");
    }

    #[test]
    fn inner_scripts_splice_into_text() {
        let (mut brain, _) = brain();
        let host = brain.cortex().host_neuron();
        host.property_set("name", "xepl");
        let mut out = String::new();
        let scope = brain.scope();
        let neuron = scope.lobe().neuron().clone();
        evaluate_inner_scripts(scope, &neuron, None, "hello {{name}} and {{name}}.", &mut out);
        assert_eq!(out, "hello xepl and xepl.");
    }

    #[test]
    fn serialize_steps_emit_xml() {
        let (mut brain, _) = brain();
        let index = brain.scope().index_link().unwrap();
        let child = Gene::new_in(&index, "c", None);
        child.trait_set("a", "1");
        assert_eq!(brain.execute_rna("$/c>"), "<c a=\"1\"/>");
    }
}
