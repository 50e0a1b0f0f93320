use super::signature_error::SignatureErrorKind::*;
use super::{CompleteType, Signature, MAX_SIGNATURE};

macro_rules! test {
    ($input:expr, $expected:pat) => {{
        let actual = Signature::new($input).map_err(|e| e.kind);

        assert!(
            matches!(actual, $expected),
            "{actual:?} does not match {}",
            stringify!($expected)
        );
    }};
}

#[test]
fn signature_tests() {
    test!("", Ok(..));
    test!("sss", Ok(..));
    test!("i", Ok(..));
    test!("b", Ok(..));
    test!("ai", Ok(..));
    test!("(i)", Ok(..));
    test!("w", Err(UnknownTypeCode(..)));
    test!("a", Err(MissingArrayElementType));
    test!("aaaaaa", Err(MissingArrayElementType));
    test!("ii(ii)a", Err(MissingArrayElementType));
    test!("ia", Err(MissingArrayElementType));
    test!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaai", Ok(..));
    test!(
        "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaai",
        Err(ExceededMaximumArrayRecursion)
    );
    test!(")", Err(StructEndedButNotStarted));
    test!("}", Err(DictEndedButNotStarted));
    test!("i)", Err(StructEndedButNotStarted));
    test!("a)", Err(MissingArrayElementType));
    test!("(", Err(StructStartedButNotEnded));
    test!("(i", Err(StructStartedButNotEnded));
    test!("(iiiii", Err(StructStartedButNotEnded));
    test!("(ai", Err(StructStartedButNotEnded));
    test!("()", Err(StructHasNoFields));
    test!("(())", Err(StructHasNoFields));
    test!("a()", Err(StructHasNoFields));
    test!("i()", Err(StructHasNoFields));
    test!("()i", Err(StructHasNoFields));
    test!("(a)", Err(MissingArrayElementType));
    test!("a{ia}", Err(MissingArrayElementType));
    test!("a{}", Err(DictEntryHasNoFields));
    test!("a{aii}", Err(DictKeyMustBeBasicType));
    test!(" ", Err(UnknownTypeCode(..)));
    test!("not a valid signature", Err(UnknownTypeCode(..)));
    test!("123", Err(UnknownTypeCode(..)));
    test!(".", Err(UnknownTypeCode(..)));
    /* https://bugs.freedesktop.org/show_bug.cgi?id=17803 */
    test!("a{(ii)i}", Err(DictKeyMustBeBasicType));
    test!("a{i}", Err(DictEntryHasOnlyOneField));
    test!("{is}", Err(DictEntryNotInsideArray));
    test!("a{isi}", Err(DictEntryHasTooManyFields));
    test!(&"i".repeat(MAX_SIGNATURE), Ok(..));
    test!(&"i".repeat(MAX_SIGNATURE + 1), Err(SignatureTooLong));
    test! {
        "((((((((((((((((((((((((((((((((ii))))))))))))))))))))))))))))))))",
        Ok(..)
    };
    test! {
        "(((((((((((((((((((((((((((((((((ii))))))))))))))))))))))))))))))))",
        Err(ExceededMaximumStructRecursion)
    };
}

#[test]
fn round_trips() {
    for s in ["", "i", "as", "a{sv}", "(iii)", "a(ia{sv})", "aai", "vvs"] {
        let signature = Signature::new(s).unwrap();
        assert_eq!(Signature::from_types(&signature.types()).as_str(), s);
        assert_eq!(signature.to_string(), s);
    }
}

#[test]
fn parsed_tree() {
    let signature = Signature::new("a{sv}").unwrap();
    let types = signature.types();

    assert_eq!(types.len(), 1);
    assert!(signature.is_single());

    let CompleteType::Array(entry) = &types[0] else {
        panic!("expected array: {types:?}");
    };

    assert_eq!(
        **entry,
        CompleteType::DictEntry(
            Box::new(CompleteType::String),
            Box::new(CompleteType::Variant)
        )
    );
}

#[test]
fn alignments() {
    assert_eq!(CompleteType::Byte.alignment(), 1);
    assert_eq!(CompleteType::Signature.alignment(), 1);
    assert_eq!(CompleteType::Variant.alignment(), 1);
    assert_eq!(CompleteType::Int16.alignment(), 2);
    assert_eq!(CompleteType::Boolean.alignment(), 4);
    assert_eq!(CompleteType::String.alignment(), 4);
    assert_eq!(CompleteType::Array(Box::new(CompleteType::Uint64)).alignment(), 4);
    assert_eq!(CompleteType::Double.alignment(), 8);
    assert_eq!(CompleteType::Struct(vec![CompleteType::Byte]).alignment(), 8);
}
