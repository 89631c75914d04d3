use anyhow::Result;

fn rna(expr: &str) -> Result<String> {
    let (mut brain, _) = crate::test::brain();
    Ok(brain.execute_rna(expr))
}

#[test]
fn joining_operators() -> Result<()> {
    assert_eq!(rna("'Hello,'.space('World!')")?, "Hello, World!");
    assert_eq!(rna("'a'.append('b').append('c')")?, "abc");
    assert_eq!(rna("'x'.tab('y')")?, "x\ty");
    assert_eq!(rna("'line'.lf")?, "line\n");
    assert_eq!(rna("'a'.slash('b').period('rs')")?, "a/b.rs");
    Ok(())
}

#[test]
fn slicing_operators() -> Result<()> {
    assert_eq!(rna("'one two three'.after(' ')")?, "two three");
    assert_eq!(rna("'one two three'.afterLast(' ')")?, "three");
    assert_eq!(rna("'one two three'.before(' ')")?, "one");
    assert_eq!(rna("'a=b;c'.afterAny('=;')")?, "b;c");
    assert_eq!(rna("'a=b;c'.beforeAny('=;')")?, "a");
    assert_eq!(rna("'a=b'.nextAny('=')")?, "=");
    Ok(())
}

#[test]
fn predicates_gate_the_ternary() -> Result<()> {
    assert_eq!(rna("'abc'.has('b')?'found':'missing'")?, "found");
    assert_eq!(rna("'abc'.has('z')?'found':'missing'")?, "missing");
    assert_eq!(rna("'abc'.is('abc')?'same':'other'")?, "same");
    assert_eq!(rna("''.empty?'nothing':'something'")?, "nothing");
    Ok(())
}

#[test]
fn decimal_arithmetic_on_text() -> Result<()> {
    assert_eq!(rna("'5'.add('3')")?, "8");
    assert_eq!(rna("'5'.sub('8')")?, "-3");
    assert_eq!(rna("'6'.mul('7')")?, "42");
    assert_eq!(rna("'5'.lt('7')?'less':'not'")?, "less");
    assert_eq!(rna("'9'.gt('7')?'more':'not'")?, "more");
    assert_eq!(rna("'7'.eq('007')?'equal':'not'")?, "equal");
    Ok(())
}

#[test]
fn recoding_operators() -> Result<()> {
    assert_eq!(rna("'MiXeD'.lower")?, "mixed");
    assert_eq!(rna("'a&amp;b &lt;tag&gt;'.deamp")?, "a&b <tag>");
    assert_eq!(rna("'a%20b+c'.depercent")?, "a b c");
    Ok(())
}
