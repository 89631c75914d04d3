//! The operator kit. Operators rewrite the running script's value buffer
//! and truth bit; every value is text, numbers are parsed on demand.
use xepl_rt::Cortex;

fn number_from(text: &str) -> i64 {
    text.trim().parse().unwrap_or(0)
}

/// Decode `&gt; &lt; &amp; &apos; &quot;` entities; anything else is kept
/// verbatim.
fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find('&') {
        out.push_str(&rest[..at]);
        let tail = &rest[at..];
        let (replacement, used) = if tail.starts_with("&amp;") {
            ("&", 5)
        } else if tail.starts_with("&lt;") {
            ("<", 4)
        } else if tail.starts_with("&gt;") {
            (">", 4)
        } else if tail.starts_with("&apos;") {
            ("'", 6)
        } else if tail.starts_with("&quot;") {
            ("\"", 6)
        } else {
            ("&", 1)
        };
        out.push_str(replacement);
        rest = &tail[used..];
    }
    out.push_str(rest);
    out
}

/// Decode `%XX` escapes and `+` as space.
fn decode_percents(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit() =>
            {
                let high = (bytes[i + 1] as char).to_digit(16).unwrap_or(0);
                let low = (bytes[i + 2] as char).to_digit(16).unwrap_or(0);
                out.push((high * 16 + low) as u8);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub fn register(cortex: &Cortex) {
    // ---- slicing ------------------------------------------------------

    cortex.register_operator("after", |script, rhs| {
        script.truth = false;
        if let Some(rhs) = rhs {
            if let Some(at) = script.value.find(rhs) {
                script.value.drain(..at + rhs.len());
                script.truth = true;
            }
        }
        Ok(())
    });

    cortex.register_operator("afterAny", |script, rhs| {
        script.truth = false;
        if let Some(rhs) = rhs {
            if let Some(at) = script.value.find(|c| rhs.contains(c)) {
                script.value.drain(..=at);
                script.truth = true;
                return Ok(());
            }
        }
        script.value.clear();
        Ok(())
    });

    cortex.register_operator("afterLast", |script, rhs| {
        script.truth = false;
        if let Some(rhs) = rhs {
            if let Some(at) = script.value.rfind(rhs) {
                script.value.drain(..at + rhs.len());
                script.truth = true;
            }
        }
        Ok(())
    });

    cortex.register_operator("before", |script, rhs| {
        script.truth = false;
        if let Some(rhs) = rhs {
            if let Some(at) = script.value.find(rhs) {
                script.value.truncate(at);
                script.truth = true;
            }
        }
        Ok(())
    });

    cortex.register_operator("beforeAny", |script, rhs| {
        script.truth = false;
        if let Some(rhs) = rhs {
            if let Some(at) = script.value.find(|c| rhs.contains(c)) {
                script.value.truncate(at);
                script.truth = true;
            }
        }
        Ok(())
    });

    cortex.register_operator("nextAny", |script, rhs| {
        script.truth = false;
        if let Some(rhs) = rhs {
            if let Some(at) = script.value.find(|c| rhs.contains(c)) {
                script.value.truncate(at + 1);
                script.value.drain(..at);
                script.truth = true;
                return Ok(());
            }
        }
        script.value.clear();
        Ok(())
    });

    // ---- joining ------------------------------------------------------

    cortex.register_operator("append", |script, rhs| {
        if let Some(rhs) = rhs {
            script.value.push_str(rhs);
        }
        script.truth = !script.value.is_empty();
        Ok(())
    });

    for (name, pad) in [
        ("cr", "\r"),
        ("lf", "\n"),
        ("crlf", "\r\n"),
        ("tab", "\t"),
        ("space", " "),
        ("period", "."),
        ("slash", "/"),
    ] {
        cortex.register_operator(name, move |script, rhs| {
            script.value.push_str(pad);
            if let Some(rhs) = rhs {
                script.value.push_str(rhs);
            }
            Ok(())
        });
    }

    // ---- predicates ---------------------------------------------------

    cortex.register_operator("empty", |script, _rhs| {
        script.truth = script.value.is_empty();
        Ok(())
    });

    cortex.register_operator("has", |script, rhs| {
        script.truth = rhs.map(|rhs| script.value.contains(rhs)).unwrap_or(false);
        Ok(())
    });

    cortex.register_operator("is", |script, rhs| {
        script.truth = rhs.map(|rhs| script.value == rhs).unwrap_or(false);
        Ok(())
    });

    // ---- decimal arithmetic on text ------------------------------------

    cortex.register_operator("add", |script, rhs| {
        if let Some(rhs) = rhs {
            script.value = (number_from(&script.value) + number_from(rhs)).to_string();
        }
        Ok(())
    });

    cortex.register_operator("sub", |script, rhs| {
        if let Some(rhs) = rhs {
            script.value = (number_from(&script.value) - number_from(rhs)).to_string();
        }
        Ok(())
    });

    cortex.register_operator("mul", |script, rhs| {
        if let Some(rhs) = rhs {
            script.value = (number_from(&script.value) * number_from(rhs)).to_string();
        }
        Ok(())
    });

    cortex.register_operator("eq", |script, rhs| {
        if let Some(rhs) = rhs {
            script.truth = number_from(&script.value) == number_from(rhs);
        }
        Ok(())
    });

    cortex.register_operator("lt", |script, rhs| {
        if let Some(rhs) = rhs {
            script.truth = number_from(&script.value) < number_from(rhs);
        }
        Ok(())
    });

    cortex.register_operator("gt", |script, rhs| {
        if let Some(rhs) = rhs {
            script.truth = number_from(&script.value) > number_from(rhs);
        }
        Ok(())
    });

    // ---- recoding -----------------------------------------------------

    cortex.register_operator("lower", |script, rhs| {
        script.value = script.value.to_lowercase();
        if let Some(rhs) = rhs {
            script.value.push_str(rhs);
        }
        script.truth = !script.value.is_empty();
        Ok(())
    });

    cortex.register_operator("deamp", |script, rhs| {
        if script.value.contains('&') {
            script.value = decode_entities(&script.value);
        }
        script.truth = !script.value.is_empty();
        if let Some(rhs) = rhs {
            script.value.push_str(rhs);
        }
        Ok(())
    });

    for name in ["depercent", "percentify"] {
        cortex.register_operator(name, |script, rhs| {
            script.value = decode_percents(&script.value);
            script.truth = !script.value.is_empty();
            if let Some(rhs) = rhs {
                script.value.push_str(rhs);
            }
            Ok(())
        });
    }

    // ---- splicers ------------------------------------------------------

    cortex.register_operator("Get", |script, rhs| {
        if let Some(rhs) = rhs {
            if let Some(found) = script.gene.as_ref().and_then(|gene| gene.get_first(rhs)) {
                script.gene = Some(found);
            }
        }
        Ok(())
    });

    cortex.register_operator("Set", |script, rhs| {
        if let (Some(gene), Some(rhs)) = (script.gene.clone(), rhs) {
            script.scope.ephemeral_set(rhs, gene);
        }
        Ok(())
    });
}
