/// One row of the fix-rule table: a rubric criterion, the score below which
/// the photo fails it, the corrective instruction for the image editor, and
/// the note keywords that signal the same problem in free text.
///
/// `keywords` is a conjunction of alternative groups: the rule matches the
/// notes only when every group contributes at least one substring hit. Most
/// rules carry a single group (any listed term fires them); the background
/// rule needs both "fondo" and a "blanco" mention before it fires.
#[derive(Clone, Copy, Debug)]
pub struct FixRule {
    pub criterion: &'static str,
    pub threshold: i64,
    pub fix: &'static str,
    pub keywords: &'static [&'static [&'static str]],
}

/// A complete evaluation rubric plus the texts used to talk to both remote
/// models. There is exactly one implementation of the pipeline; forked
/// per-locale copies are replaced by instances of this struct.
///
/// The order of `rules` is a contract: fixes are derived, reported and
/// concatenated into the edit instruction in declaration order.
#[derive(Clone, Copy, Debug)]
pub struct Rubric {
    pub name: &'static str,
    pub locale: &'static str,
    /// System instructions handed to the evaluation agent.
    pub agent_instructions: &'static str,
    /// Strict output-format reminder appended to every user prompt.
    pub output_format_reminder: &'static str,
    /// Fixed framing that opens the generated edit instruction.
    pub edit_preamble: &'static str,
    /// Fixed constraint that closes the generated edit instruction.
    pub edit_closing: &'static str,
    /// Emitted when neither scores nor notes yield anything actionable.
    pub generic_fix: &'static str,
    pub rules: &'static [FixRule],
}

impl Rubric {
    /// Full prompt sent as the user message: caller text plus the strict
    /// output-format reminder.
    pub fn user_prompt(&self, base: &str) -> String {
        format!("{}\n\n{}", base.trim(), self.output_format_reminder)
    }
}

/// Spanish document-photo rubric (the production rubric).
pub const DOCUMENT_PHOTO_ES: Rubric = Rubric {
    name: "document-photo",
    locale: "es",
    agent_instructions: "Eres un asistente de evaluación de fotografías tipo documento. Sigue este rúbrico estricto y devuelve SIEMPRE un único objeto JSON (sin texto adicional) con las claves: overall_score (entero 0-100), criteria_scores (objeto que mapea str->int), safe (booleano) y notes (cadena en español).\n\nReglas a validar y puntuación (para validaciones consistentes y repetibles):\n- tamaño_3x4: 0-25 — La imagen debe tener proporción 3:4 (ancho:alto ≈ 3:4, tolerancia ±5%).\n- fondo_blanco: 0-25 — El fondo debe ser blanco o muy cercano a blanco, uniforme y sin patrones.\n- mirada_frontal_rostro_homogeneo: 0-20 — La persona debe mirar al frente, cabeza centrada, rostro totalmente visible y con iluminación homogénea.\n- sin_dientes_visibles: 0-10 — La persona no debe mostrar los dientes (labios relajados y cerrados).\n- identificable_sin_obstrucciones: 0-20 — Nada debe impedir la identificación (sin mascarillas, gafas de sol, viseras, objetos, sombras fuertes ni filtros; gafas transparentes aceptables si no tapan los ojos).\n\nCalcula overall_score como la suma de los criterios anteriores (limita a 0-100). Establece safe=true solo si TODAS las reglas están cumplidas; en caso contrario, safe=false.\n\nFormato de notes (en español y conciso):\n- Si hay incumplimientos, lista cada regla NO respetada y explica por qué no se cumple (máximo 2 líneas por punto).\n- Si todas se cumplen, indica brevemente que la foto cumple con los requisitos.\n\nSi no puedes puntuar la imagen por cualquier motivo, devuelve overall_score=0, safe=false y una nota corta explicando el motivo (en español).",
    output_format_reminder: "Formato de salida estricto: devuelve SOLO un objeto JSON con las claves 'overall_score', 'criteria_scores', 'safe' y 'notes'. La nota ('notes') debe estar en español. Si hay incumplimientos, lista cuáles características NO fueron respetadas y por qué.",
    edit_preamble: "Edita la imagen para cumplir con las reglas de fotografía tipo documento. Aplica SOLO los cambios necesarios manteniendo la identidad. Cambios requeridos: ",
    edit_closing: ". Exporta con calidad fotográfica, sin texto sobreimpreso.",
    generic_fix: "Mejorar sutilmente para cumplir estrictamente el rúbrico sin alterar la identidad.",
    rules: &[
        FixRule {
            criterion: "tamaño_3x4",
            threshold: 25,
            fix: "Ajustar el recorte a proporción exacta 3:4 (ancho:alto) sin deformaciones.",
            keywords: &[&["3x4", "3:4"]],
        },
        FixRule {
            criterion: "fondo_blanco",
            threshold: 25,
            fix: "Uniformizar el fondo a blanco puro (#FFFFFF), sin texturas ni sombras.",
            // A note about the background alone is not actionable; it must
            // also mention whiteness before this fix fires.
            keywords: &[&["fondo"], &["blanco"]],
        },
        FixRule {
            criterion: "mirada_frontal_rostro_homogeneo",
            threshold: 20,
            fix: "Mirada frontal con cabeza centrada, rostro totalmente visible e iluminación homogénea.",
            keywords: &[&["mirada", "frontal", "rostro"]],
        },
        FixRule {
            criterion: "sin_dientes_visibles",
            threshold: 10,
            fix: "Cerrar los labios; sin dientes visibles.",
            keywords: &[&["diente"]],
        },
        FixRule {
            criterion: "identificable_sin_obstrucciones",
            threshold: 20,
            fix: "Eliminar obstrucciones (mascarillas, gafas de sol, viseras, sombras fuertes u objetos).",
            keywords: &[&["obstru", "mascar", "gafa de sol", "visera"]],
        },
    ],
};

/// English general-photo rubric, kept to show the rubric is configuration
/// rather than a fork of the pipeline.
pub const GENERAL_PHOTO_EN: Rubric = Rubric {
    name: "general-photo",
    locale: "en",
    agent_instructions: "You are an image evaluation assistant. Follow this strict rubric and always return only a single JSON object (no additional text) with the keys: overall_score (integer 0-100), criteria_scores (object mapping str->int), safe (boolean), and notes (string).\n\nScoring rubric (for consistent, repeatable validations):\n- composition: 0-25\n- exposure: 0-20\n- sharpness: 0-15\n- relevance_to_prompt: 0-30\n- safety: 0-10\n\nCompute overall_score as the sum of the criteria above (clamp to 0-100). Be concise in `notes` and explain the most important reasons for the score. If you cannot score an image for any reason, return overall_score=0, safe=false and a short note explaining why.",
    output_format_reminder: "Strict output format: return ONLY a JSON object with the keys 'overall_score', 'criteria_scores', 'safe' and 'notes'. If rules are violated, list which ones and why.",
    edit_preamble: "Edit the image to satisfy the photo rubric. Apply ONLY the necessary changes while preserving identity. Required changes: ",
    edit_closing: ". Export with photographic quality, no overlaid text.",
    generic_fix: "Subtly improve the photo to strictly satisfy the rubric without altering identity.",
    rules: &[
        FixRule {
            criterion: "composition",
            threshold: 25,
            fix: "Recompose the frame so the subject is centered and properly cropped.",
            keywords: &[&["composition", "crop", "framing"]],
        },
        FixRule {
            criterion: "exposure",
            threshold: 20,
            fix: "Correct the exposure for even, natural lighting.",
            keywords: &[&["exposure", "too dark", "too bright", "lighting"]],
        },
        FixRule {
            criterion: "sharpness",
            threshold: 15,
            fix: "Sharpen the subject; remove motion blur.",
            keywords: &[&["blur", "sharp", "focus"]],
        },
        FixRule {
            criterion: "relevance_to_prompt",
            threshold: 30,
            fix: "Adjust the content to better match the requested subject.",
            keywords: &[&["relevance", "subject"]],
        },
        FixRule {
            criterion: "safety",
            threshold: 10,
            fix: "Remove unsafe or inappropriate content.",
            keywords: &[&["unsafe", "inappropriate"]],
        },
    ],
};

pub fn builtin_rubric(name: &str) -> Option<&'static Rubric> {
    match name.trim() {
        "document-photo" | "document-es" => Some(&DOCUMENT_PHOTO_ES),
        "general-photo" | "general-en" => Some(&GENERAL_PHOTO_EN),
        _ => None,
    }
}
