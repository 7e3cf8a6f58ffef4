use std::collections::BTreeMap;

use crate::rubric::Rubric;

/// Derives corrective instructions from a rubric score breakdown and/or the
/// evaluator's free-text notes.
///
/// Resolution is deterministic and ordered by the rubric's rule table:
/// 1. when the criteria mapping is non-empty, every rule whose score falls
///    below its threshold contributes its fix (missing keys count as 0);
/// 2. when no rule fired, the notes are scanned for each rule's keyword
///    groups (case-insensitive substrings; every group must hit), in the
///    same rule order;
/// 3. when still nothing is actionable, the rubric's single generic,
///    identity-preserving fix is substituted.
///
/// Returns the edit instruction to hand to the image-edit model and the
/// ordered fix list it was assembled from. The fix list is never empty.
pub fn derive_fixes(
    rubric: &Rubric,
    criteria_scores: &BTreeMap<String, i64>,
    notes: &str,
) -> (String, Vec<String>) {
    let mut fixes: Vec<String> = Vec::new();

    if !criteria_scores.is_empty() {
        for rule in rubric.rules {
            let score = criteria_scores.get(rule.criterion).copied().unwrap_or(0);
            if score < rule.threshold {
                fixes.push(rule.fix.to_string());
            }
        }
    }

    if fixes.is_empty() {
        let lowered = notes.to_lowercase();
        for rule in rubric.rules {
            let matched = !rule.keywords.is_empty()
                && rule
                    .keywords
                    .iter()
                    .all(|group| group.iter().any(|keyword| lowered.contains(keyword)));
            if matched {
                fixes.push(rule.fix.to_string());
            }
        }
    }

    if fixes.is_empty() {
        fixes.push(rubric.generic_fix.to_string());
    }

    let instruction = format!(
        "{}{}{}",
        rubric.edit_preamble,
        fixes.join("; "),
        rubric.edit_closing
    );
    (instruction, fixes)
}

/// Splits an explicit prompt override into reportable fix candidates. The
/// override itself is always used verbatim; this exists purely so the
/// response can still carry an applied-fixes list.
pub fn split_fix_candidates(prompt: &str) -> Vec<String> {
    prompt
        .split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::rubric::DOCUMENT_PHOTO_ES;

    use super::*;

    fn scores(entries: &[(&str, i64)]) -> BTreeMap<String, i64> {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), *value))
            .collect()
    }

    #[test]
    fn single_failing_criterion_yields_single_fix() {
        let scores = scores(&[
            ("fondo_blanco", 10),
            ("tamaño_3x4", 25),
            ("sin_dientes_visibles", 10),
            ("mirada_frontal_rostro_homogeneo", 20),
            ("identificable_sin_obstrucciones", 20),
        ]);
        let (instruction, fixes) = derive_fixes(&DOCUMENT_PHOTO_ES, &scores, "");
        assert_eq!(fixes.len(), 1);
        assert!(fixes[0].contains("fondo a blanco puro"));
        assert!(instruction.starts_with(DOCUMENT_PHOTO_ES.edit_preamble));
        assert!(instruction.ends_with(DOCUMENT_PHOTO_ES.edit_closing));
        assert!(instruction.contains(&fixes[0]));
    }

    #[test]
    fn missing_criterion_key_counts_as_zero() {
        let scores = scores(&[("fondo_blanco", 25)]);
        let (_, fixes) = derive_fixes(&DOCUMENT_PHOTO_ES, &scores, "");
        // Every other rule fired because its score defaulted to 0.
        assert_eq!(fixes.len(), 4);
        assert!(fixes.iter().all(|fix| !fix.contains("fondo a blanco")));
    }

    #[test]
    fn fixes_follow_rule_declaration_order() {
        let scores = scores(&[
            ("identificable_sin_obstrucciones", 0),
            ("tamaño_3x4", 0),
        ]);
        let (_, fixes) = derive_fixes(&DOCUMENT_PHOTO_ES, &scores, "");
        let ratio_pos = fixes
            .iter()
            .position(|fix| fix.contains("3:4"))
            .expect("ratio fix present");
        let obstruction_pos = fixes
            .iter()
            .position(|fix| fix.contains("obstrucciones"))
            .expect("obstruction fix present");
        assert!(ratio_pos < obstruction_pos);
    }

    #[test]
    fn clean_scores_fall_back_to_note_keywords() {
        let scores = scores(&[
            ("fondo_blanco", 25),
            ("tamaño_3x4", 25),
            ("sin_dientes_visibles", 10),
            ("mirada_frontal_rostro_homogeneo", 20),
            ("identificable_sin_obstrucciones", 20),
        ]);
        let (_, fixes) = derive_fixes(
            &DOCUMENT_PHOTO_ES,
            &scores,
            "El FONDO no es BLANCO y la persona muestra un diente.",
        );
        assert_eq!(fixes.len(), 2);
        assert!(fixes[0].contains("fondo"));
        assert!(fixes[1].contains("labios"));
    }

    #[test]
    fn background_keyword_needs_both_fondo_and_blanco() {
        let (_, fixes) = derive_fixes(
            &DOCUMENT_PHOTO_ES,
            &BTreeMap::new(),
            "el fondo presenta sombras",
        );
        assert!(
            fixes.iter().all(|fix| !fix.contains("blanco puro")),
            "background fix fired on 'fondo' alone: {fixes:?}"
        );
        assert_eq!(fixes, vec![DOCUMENT_PHOTO_ES.generic_fix.to_string()]);

        let (_, fixes) = derive_fixes(
            &DOCUMENT_PHOTO_ES,
            &BTreeMap::new(),
            "el fondo no es blanco",
        );
        assert_eq!(fixes.len(), 1);
        assert!(fixes[0].contains("blanco puro"));
    }

    #[test]
    fn empty_scores_and_clean_notes_yield_generic_fallback() {
        let (instruction, fixes) = derive_fixes(
            &DOCUMENT_PHOTO_ES,
            &BTreeMap::new(),
            "la foto cumple con los requisitos",
        );
        assert_eq!(fixes, vec![DOCUMENT_PHOTO_ES.generic_fix.to_string()]);
        assert!(instruction.contains(DOCUMENT_PHOTO_ES.generic_fix));
    }

    #[test]
    fn split_fix_candidates_trims_and_drops_empties() {
        assert_eq!(
            split_fix_candidates("ajustar recorte;  fondo blanco ; ;"),
            vec!["ajustar recorte".to_string(), "fondo blanco".to_string()]
        );
        assert!(split_fix_candidates("  ").is_empty());
    }
}
