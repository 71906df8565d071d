//! Adaptive 8th-order Dormand-Prince 8(5,3) integrator with dense output.
//!
//! The 12-stage tableau, the combined 5th/3rd-order error estimate and the
//! three extra dense-output stages follow Hairer, Noersett & Wanner,
//! "Solving Ordinary Differential Equations I" (DOP853).

/// System of ordinary differential equations dy/dt = f(t, y).
/// The only capability the stepper requires from its caller.
pub trait OdeRhs<const N: usize> {
    fn derivs(&self, t: f64, y: &[f64; N], dydt: &mut [f64; N]);
}

/// Numerical failure inside a single step attempt.
#[derive(Debug, Clone)]
pub enum StepError {
    /// The error control drove the step size below representable resolution.
    StepSizeUnderflow { t: f64, h: f64 },
    /// A state or derivative component became NaN or infinite.
    NonFiniteState { t: f64 },
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepError::StepSizeUnderflow { t, h } => {
                write!(f, "step size {} underflowed at t = {}", h, t)
            }
            StepError::NonFiniteState { t } => {
                write!(f, "non-finite state at t = {}", t)
            }
        }
    }
}

impl std::error::Error for StepError {}

/// I-controller for the step size: h_new = safety * h * err^(-1/8),
/// clamped to [min_factor, max_factor] per step.
#[derive(Debug, Clone)]
pub struct StepController {
    pub safety: f64,
    pub min_factor: f64,
    pub max_factor: f64,
    exponent: f64,
}

impl Default for StepController {
    fn default() -> Self {
        StepController {
            safety: 0.9,
            min_factor: 1.0 / 3.0,
            max_factor: 6.0,
            exponent: 1.0 / 8.0,
        }
    }
}

impl StepController {
    fn factor(&self, err: f64) -> f64 {
        if err == 0.0 {
            return self.max_factor;
        }
        (self.safety * err.powf(-self.exponent)).clamp(self.min_factor, self.max_factor)
    }
}

/// Integration statistics for diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepperStats {
    pub fn_evals: u64,
    pub accepted_steps: u64,
    pub rejected_steps: u64,
}

// nodes c2..c16 (c1 = 0); stages 12 and 13 sit at the step end
const C2: f64 = 0.526_001_519_587_677_318_785_587_544_488e-1;
const C3: f64 = 0.789_002_279_381_515_978_178_381_316_732e-1;
const C4: f64 = 0.118_350_341_907_227_396_726_757_197_510;
const C5: f64 = 0.281_649_658_092_772_603_273_242_802_490;
const C6: f64 = 1.0 / 3.0;
const C7: f64 = 0.25;
const C8: f64 = 0.307_692_307_692_307_692_307_692_307_692;
const C9: f64 = 0.651_282_051_282_051_282_051_282_051_282;
const C10: f64 = 0.6;
const C11: f64 = 0.857_142_857_142_857_142_857_142_857_142;
const C14: f64 = 0.1;
const C15: f64 = 0.2;
const C16: f64 = 0.777_777_777_777_777_777_777_777_777_778;

const B1: f64 = 5.429_373_411_656_876_223_805_357_663_63e-2;
const B6: f64 = 4.450_312_892_752_408_881_441_139_505_66;
const B7: f64 = 1.891_517_899_314_500_383_042_815_990_44;
const B8: f64 = -5.801_203_960_010_584_781_467_211_422_7;
const B9: f64 = 3.111_643_669_578_198_944_089_160_623_7e-1;
const B10: f64 = -1.521_609_496_625_160_785_561_788_068_05e-1;
const B11: f64 = 2.013_654_008_040_303_483_747_765_375_01e-1;
const B12: f64 = 4.471_061_572_777_259_051_768_855_690_43e-2;

const BHH1: f64 = 0.244_094_488_188_976_377_952_755_905_512;
const BHH2: f64 = 0.733_846_688_281_611_857_341_361_741_547;
const BHH3: f64 = 0.220_588_235_294_117_647_058_823_529_412e-1;

const ER1: f64 = 0.131_200_449_941_948_807_325_010_299_6e-1;
const ER6: f64 = -0.122_515_644_637_620_444_072_056_975_3e1;
const ER7: f64 = -0.495_758_949_657_250_191_521_407_995_2;
const ER8: f64 = 0.166_437_718_245_498_653_696_153_041_5e1;
const ER9: f64 = -0.350_328_848_749_973_681_688_648_729_0;
const ER10: f64 = 0.334_179_118_713_017_479_029_731_884_1;
const ER11: f64 = 0.819_232_064_851_157_124_657_074_261_3e-1;
const ER12: f64 = -0.223_553_078_638_862_952_588_442_784_5e-1;

const A21: f64 = 5.260_015_195_876_773_187_855_875_444_88e-2;
const A31: f64 = 1.972_505_698_453_789_945_445_953_291_83e-2;
const A32: f64 = 5.917_517_095_361_369_836_337_859_875_49e-2;
const A41: f64 = 2.958_758_547_680_684_918_168_929_937_75e-2;
const A43: f64 = 8.876_275_643_042_054_754_506_789_813_24e-2;
const A51: f64 = 2.413_651_341_592_666_855_023_697_986_65e-1;
const A53: f64 = -8.845_494_793_282_860_853_448_649_627_17e-1;
const A54: f64 = 9.248_340_032_617_920_031_157_379_665_43e-1;
const A61: f64 = 3.703_703_703_703_703_703_703_703_703_7e-2;
const A64: f64 = 1.708_286_087_294_738_712_796_044_821_73e-1;
const A65: f64 = 1.254_676_875_668_224_250_166_918_141_23e-1;
const A71: f64 = 3.710_937_5e-2;
const A74: f64 = 1.702_522_110_195_440_393_149_780_602_72e-1;
const A75: f64 = 6.021_653_898_045_596_068_502_193_972_83e-2;
const A76: f64 = -1.757_812_5e-2;
const A81: f64 = 3.709_200_011_850_479_271_087_793_198_36e-2;
const A84: f64 = 1.703_839_257_122_399_938_102_140_547_05e-1;
const A85: f64 = 1.072_620_304_463_732_846_518_091_991_68e-1;
const A86: f64 = -1.531_943_774_862_440_175_279_361_582_36e-2;
const A87: f64 = 8.273_789_163_814_022_887_584_737_660_02e-3;
const A91: f64 = 6.241_109_587_160_757_171_144_295_778_12e-1;
const A94: f64 = -3.360_892_629_446_941_294_068_571_098_25;
const A95: f64 = -8.682_193_468_417_260_068_181_898_914_53e-1;
const A96: f64 = 2.759_209_969_944_670_830_494_156_007_97e1;
const A97: f64 = 2.015_406_755_047_789_340_861_867_889_79e1;
const A98: f64 = -4.348_988_418_106_995_884_773_662_551_44e1;
const A101: f64 = 4.776_625_364_382_643_658_904_339_085_27e-1;
const A104: f64 = -2.488_114_619_971_667_641_926_425_864_68;
const A105: f64 = -5.902_908_268_368_429_963_714_464_757_43e-1;
const A106: f64 = 2.123_005_144_818_119_423_472_889_498_97e1;
const A107: f64 = 1.527_923_363_288_242_358_325_969_229_38e1;
const A108: f64 = -3.328_821_096_898_486_291_944_532_655_87e1;
const A109: f64 = -2.033_120_170_850_862_613_582_229_285_93e-2;
const A111: f64 = -9.371_424_300_859_873_257_170_402_165_8e-1;
const A114: f64 = 5.186_372_428_844_063_708_300_238_532_09;
const A115: f64 = 1.091_437_348_996_729_578_185_002_546_54;
const A116: f64 = -8.149_787_010_746_926_125_139_972_673_57;
const A117: f64 = -1.852_006_565_999_695_986_415_661_807_01e1;
const A118: f64 = 2.273_948_709_935_050_428_189_700_567_34e1;
const A119: f64 = 2.493_605_552_679_652_389_870_893_967_62;
const A1110: f64 = -3.046_764_471_898_219_500_382_366_902_2;
const A121: f64 = 2.273_310_147_516_538_207_923_597_684_49;
const A124: f64 = -1.053_449_546_673_725_019_840_666_898_79e1;
const A125: f64 = -2.000_872_058_224_862_499_096_757_184_44;
const A126: f64 = -1.795_893_186_311_879_891_727_659_505_34e1;
const A127: f64 = 2.794_888_452_941_996_005_084_998_088_37e1;
const A128: f64 = -2.858_998_277_135_023_694_740_655_086_74;
const A129: f64 = -8.872_856_933_530_629_544_335_492_892_58;
const A1210: f64 = 1.236_056_717_579_430_306_472_662_015_28e1;
const A1211: f64 = 6.433_927_460_157_635_303_559_704_840_46e-1;

// extra stages for dense output
const A141: f64 = 5.616_750_228_304_795_233_929_092_196_81e-2;
const A147: f64 = 2.535_002_102_166_248_110_887_947_653_33e-1;
const A148: f64 = -2.462_390_374_708_024_899_174_414_754_41e-1;
const A149: f64 = -1.241_914_232_638_163_604_690_101_406_26e-1;
const A1410: f64 = 1.532_917_982_787_656_973_120_632_268_5e-1;
const A1411: f64 = 8.201_052_295_634_689_884_916_666_020_57e-3;
const A1412: f64 = 7.567_897_660_545_699_761_386_035_895_84e-3;
const A1413: f64 = -8.298e-3;

const A151: f64 = 3.183_464_816_350_214_050_607_684_732_61e-2;
const A156: f64 = 2.830_090_967_236_677_552_883_229_614_02e-2;
const A157: f64 = 5.354_198_830_743_856_762_237_973_843_72e-2;
const A158: f64 = -5.492_374_857_139_098_846_465_693_403_06e-2;
const A1511: f64 = -1.083_473_286_972_493_228_585_093_169_94e-4;
const A1512: f64 = 3.825_710_908_356_584_129_549_201_923_23e-4;
const A1513: f64 = -3.404_650_086_874_045_608_029_771_144_92e-4;
const A1514: f64 = 1.413_124_436_746_325_002_780_746_183_66e-1;

const A161: f64 = -4.288_963_015_837_919_234_085_735_386_92e-1;
const A166: f64 = -4.697_621_415_361_163_843_144_494_472_06;
const A167: f64 = 7.683_421_196_062_599_041_842_409_538_78;
const A168: f64 = 4.068_989_818_397_110_079_702_135_543_31;
const A169: f64 = 3.567_271_874_552_811_092_706_695_430_21e-1;
const A1613: f64 = -1.399_024_165_159_014_621_294_180_097_34e-3;
const A1614: f64 = 2.947_514_789_152_772_338_955_627_214_9;
const A1615: f64 = -9.150_958_472_179_870_010_818_701_871_38;

// dense-output weight rows d4..d7 over stages 1, 6..16
const D41: f64 = -0.842_893_827_610_901_286_513_534_911_42e1;
const D46: f64 = 0.566_714_953_519_377_769_625_317_835_90;
const D47: f64 = -0.306_894_994_594_989_169_127_973_047_27e1;
const D48: f64 = 0.238_466_765_651_206_982_877_281_496_80e1;
const D49: f64 = 0.211_703_458_244_502_827_671_551_499_46e1;
const D410: f64 = -0.871_391_583_777_972_992_067_899_074_90;
const D411: f64 = 0.224_043_743_026_078_827_585_417_716_50e1;
const D412: f64 = 0.631_578_778_769_468_818_155_702_492_90;
const D413: f64 = -0.889_903_364_513_333_108_206_981_174_00e-1;
const D414: f64 = 0.181_485_055_208_547_272_566_564_049_62e2;
const D415: f64 = -0.919_463_239_247_835_540_004_519_844_36e1;
const D416: f64 = -0.443_603_638_759_489_396_643_105_720_00e1;

const D51: f64 = 0.104_275_086_425_791_346_034_131_510_09e2;
const D56: f64 = 0.242_283_491_775_258_182_884_301_753_19e3;
const D57: f64 = 0.165_200_451_717_270_281_985_053_948_87e3;
const D58: f64 = -0.374_546_754_722_690_202_795_183_121_52e3;
const D59: f64 = -0.221_136_668_531_253_060_362_709_385_78e2;
const D510: f64 = 0.773_343_266_847_226_383_896_038_988_08e1;
const D511: f64 = -0.306_740_847_310_893_981_820_612_136_26e2;
const D512: f64 = -0.933_213_052_643_022_787_295_672_217_06e1;
const D513: f64 = 0.156_972_381_217_708_438_861_310_910_75e2;
const D514: f64 = -0.311_394_032_195_651_776_772_828_504_11e2;
const D515: f64 = -0.935_292_435_884_447_838_657_138_626_64e1;
const D516: f64 = 0.358_168_414_863_940_837_524_658_985_40e2;

const D61: f64 = 0.199_850_532_420_024_338_209_876_536_17e2;
const D66: f64 = -0.387_037_308_749_351_765_551_059_017_42e3;
const D67: f64 = -0.189_178_138_195_167_568_828_308_383_28e3;
const D68: f64 = 0.527_808_159_205_423_649_005_610_166_86e3;
const D69: f64 = -0.115_739_025_399_596_301_261_418_711_34e2;
const D610: f64 = 0.688_123_269_469_630_001_696_669_226_61e1;
const D611: f64 = -0.100_060_509_669_108_384_031_838_609_80e1;
const D612: f64 = 0.777_713_779_805_344_320_928_692_657_40;
const D613: f64 = -0.277_820_575_235_350_840_659_320_043_39e1;
const D614: f64 = -0.601_966_952_312_641_207_582_673_808_46e2;
const D615: f64 = 0.843_204_055_066_774_861_156_510_682_22e2;
const D616: f64 = 0.119_922_911_361_827_893_280_351_300_30e2;

const D71: f64 = -0.256_939_334_627_037_490_033_125_861_29e2;
const D76: f64 = -0.154_189_748_690_236_433_740_539_936_27e3;
const D77: f64 = -0.231_529_379_176_045_495_675_360_391_09e3;
const D78: f64 = 0.357_639_117_910_614_123_782_853_499_10e3;
const D79: f64 = 0.934_053_241_836_243_100_039_076_917_04e2;
const D710: f64 = -0.374_583_231_364_516_331_568_751_393_51e2;
const D711: f64 = 0.104_099_649_508_962_300_451_472_461_84e3;
const D712: f64 = 0.298_402_934_266_605_031_233_443_635_79e2;
const D713: f64 = -0.435_334_565_900_111_437_544_321_750_58e2;
const D714: f64 = 0.963_245_539_591_882_829_483_949_506_00e2;
const D715: f64 = -0.391_772_616_756_154_391_652_314_861_72e2;
const D716: f64 = -0.149_726_836_257_985_625_814_221_252_76e3;

/// Dormand-Prince 8(5,3) stepper owning the current (t, y) state.
///
/// After an accepted step [`Dopr853::dense_out`] interpolates any state
/// component anywhere inside the step at fixed cost.
pub struct Dopr853<const N: usize> {
    t: f64,
    t_old: f64,
    y: [f64; N],
    dydt: [f64; N],
    atol: f64,
    rtol: f64,
    controller: StepController,
    h_did: f64,
    h_next: f64,
    rcont: [[f64; N]; 8],
    first: bool,
    pub stats: StepperStats,
}

impl<const N: usize> Dopr853<N> {
    pub fn new(t0: f64, y0: [f64; N], atol: f64, rtol: f64) -> Dopr853<N> {
        Dopr853 {
            t: t0,
            t_old: t0,
            y: y0,
            dydt: [0.0; N],
            atol,
            rtol,
            controller: StepController::default(),
            h_did: 0.0,
            h_next: 0.0,
            rcont: [[0.0; N]; 8],
            first: true,
            stats: StepperStats::default(),
        }
    }

    pub fn t(&self) -> f64 {
        self.t
    }

    pub fn y(&self) -> &[f64; N] {
        &self.y
    }

    /// Step size of the last accepted step.
    pub fn h_did(&self) -> f64 {
        self.h_did
    }

    /// Suggested size for the next step.
    pub fn h_next(&self) -> f64 {
        self.h_next
    }

    /// Restart from a new state, e.g. after the caller truncated the
    /// trajectory at a wall. Invalidates the dense-output interval.
    pub fn reset(&mut self, t: f64, y: [f64; N]) {
        self.t = t;
        self.t_old = t;
        self.y = y;
        self.first = true;
    }

    /// Advance by at most `h_try`, shrinking on error-control rejection.
    /// Returns (h_did, h_next) like the classic interface.
    pub fn step<R: OdeRhs<N>>(&mut self, h_try: f64, rhs: &R) -> Result<(f64, f64), StepError> {
        if self.first {
            let (t, y) = (self.t, self.y);
            rhs.derivs(t, &y, &mut self.dydt);
            self.stats.fn_evals += 1;
            self.first = false;
        }
        let mut h = h_try;
        loop {
            if !h.is_finite() || h.abs() <= self.t.abs().max(1.0) * f64::EPSILON {
                return Err(StepError::StepSizeUnderflow { t: self.t, h });
            }
            let (y_new, k, err) = self.try_step(h, rhs)?;
            if err <= 1.0 {
                self.finish_step(h, y_new, k, rhs);
                self.h_did = h;
                self.h_next = h * self.controller.factor(err);
                self.stats.accepted_steps += 1;
                return Ok((self.h_did, self.h_next));
            }
            self.stats.rejected_steps += 1;
            h *= self.controller.factor(err).min(1.0);
        }
    }

    /// Interpolate component i at time t within the last accepted step.
    pub fn dense_out(&self, i: usize, t: f64) -> f64 {
        let s = (t - self.t_old) / self.h_did;
        let s1 = 1.0 - s;
        let r = &self.rcont;
        r[0][i]
            + s * (r[1][i]
                + s1 * (r[2][i]
                    + s * (r[3][i]
                        + s1 * (r[4][i]
                            + s * (r[5][i] + s1 * (r[6][i] + s * r[7][i]))))))
    }

    /// The twelve stages plus the scaled error estimate.
    #[allow(clippy::type_complexity)]
    fn try_step<R: OdeRhs<N>>(
        &mut self,
        h: f64,
        rhs: &R,
    ) -> Result<([f64; N], [[f64; N]; 12], f64), StepError> {
        let t = self.t;
        let y = &self.y;
        let mut k = [[0.0; N]; 12];
        k[0] = self.dydt;
        let mut yt = [0.0; N];

        for i in 0..N {
            yt[i] = y[i] + h * A21 * k[0][i];
        }
        rhs.derivs(t + C2 * h, &yt, &mut k[1]);
        for i in 0..N {
            yt[i] = y[i] + h * (A31 * k[0][i] + A32 * k[1][i]);
        }
        rhs.derivs(t + C3 * h, &yt, &mut k[2]);
        for i in 0..N {
            yt[i] = y[i] + h * (A41 * k[0][i] + A43 * k[2][i]);
        }
        rhs.derivs(t + C4 * h, &yt, &mut k[3]);
        for i in 0..N {
            yt[i] = y[i] + h * (A51 * k[0][i] + A53 * k[2][i] + A54 * k[3][i]);
        }
        rhs.derivs(t + C5 * h, &yt, &mut k[4]);
        for i in 0..N {
            yt[i] = y[i] + h * (A61 * k[0][i] + A64 * k[3][i] + A65 * k[4][i]);
        }
        rhs.derivs(t + C6 * h, &yt, &mut k[5]);
        for i in 0..N {
            yt[i] = y[i] + h * (A71 * k[0][i] + A74 * k[3][i] + A75 * k[4][i] + A76 * k[5][i]);
        }
        rhs.derivs(t + C7 * h, &yt, &mut k[6]);
        for i in 0..N {
            yt[i] = y[i]
                + h * (A81 * k[0][i]
                    + A84 * k[3][i]
                    + A85 * k[4][i]
                    + A86 * k[5][i]
                    + A87 * k[6][i]);
        }
        rhs.derivs(t + C8 * h, &yt, &mut k[7]);
        for i in 0..N {
            yt[i] = y[i]
                + h * (A91 * k[0][i]
                    + A94 * k[3][i]
                    + A95 * k[4][i]
                    + A96 * k[5][i]
                    + A97 * k[6][i]
                    + A98 * k[7][i]);
        }
        rhs.derivs(t + C9 * h, &yt, &mut k[8]);
        for i in 0..N {
            yt[i] = y[i]
                + h * (A101 * k[0][i]
                    + A104 * k[3][i]
                    + A105 * k[4][i]
                    + A106 * k[5][i]
                    + A107 * k[6][i]
                    + A108 * k[7][i]
                    + A109 * k[8][i]);
        }
        rhs.derivs(t + C10 * h, &yt, &mut k[9]);
        for i in 0..N {
            yt[i] = y[i]
                + h * (A111 * k[0][i]
                    + A114 * k[3][i]
                    + A115 * k[4][i]
                    + A116 * k[5][i]
                    + A117 * k[6][i]
                    + A118 * k[7][i]
                    + A119 * k[8][i]
                    + A1110 * k[9][i]);
        }
        rhs.derivs(t + C11 * h, &yt, &mut k[10]);
        for i in 0..N {
            yt[i] = y[i]
                + h * (A121 * k[0][i]
                    + A124 * k[3][i]
                    + A125 * k[4][i]
                    + A126 * k[5][i]
                    + A127 * k[6][i]
                    + A128 * k[7][i]
                    + A129 * k[8][i]
                    + A1210 * k[9][i]
                    + A1211 * k[10][i]);
        }
        rhs.derivs(t + h, &yt, &mut k[11]);
        self.stats.fn_evals += 11;

        let mut y_new = [0.0; N];
        let mut err5 = 0.0;
        let mut err3 = 0.0;
        for i in 0..N {
            let sum_b = B1 * k[0][i]
                + B6 * k[5][i]
                + B7 * k[6][i]
                + B8 * k[7][i]
                + B9 * k[8][i]
                + B10 * k[9][i]
                + B11 * k[10][i]
                + B12 * k[11][i];
            y_new[i] = y[i] + h * sum_b;
            if !y_new[i].is_finite() {
                return Err(StepError::NonFiniteState { t: t + h });
            }
            let sk = self.atol + self.rtol * y[i].abs().max(y_new[i].abs());
            let e5 = ER1 * k[0][i]
                + ER6 * k[5][i]
                + ER7 * k[6][i]
                + ER8 * k[7][i]
                + ER9 * k[8][i]
                + ER10 * k[9][i]
                + ER11 * k[10][i]
                + ER12 * k[11][i];
            let e3 = sum_b - BHH1 * k[0][i] - BHH2 * k[8][i] - BHH3 * k[11][i];
            err5 += (e5 / sk) * (e5 / sk);
            err3 += (e3 / sk) * (e3 / sk);
        }
        let mut deno = err5 + 0.01 * err3;
        if deno <= 0.0 {
            deno = 1.0;
        }
        let err = h.abs() * err5 / (deno * N as f64).sqrt();
        Ok((y_new, k, err))
    }

    /// Accept the step: evaluate the endpoint derivative and the three
    /// extra stages, assemble the dense-output coefficients, advance.
    fn finish_step<R: OdeRhs<N>>(
        &mut self,
        h: f64,
        y_new: [f64; N],
        k: [[f64; N]; 12],
        rhs: &R,
    ) {
        let t = self.t;
        let y = &self.y;

        // derivative at the new point; reused as the next step's k1
        let mut k13 = [0.0; N];
        rhs.derivs(t + h, &y_new, &mut k13);

        let mut yt = [0.0; N];
        for i in 0..N {
            yt[i] = y[i]
                + h * (A141 * k[0][i]
                    + A147 * k[6][i]
                    + A148 * k[7][i]
                    + A149 * k[8][i]
                    + A1410 * k[9][i]
                    + A1411 * k[10][i]
                    + A1412 * k[11][i]
                    + A1413 * k13[i]);
        }
        let mut k14 = [0.0; N];
        rhs.derivs(t + C14 * h, &yt, &mut k14);
        for i in 0..N {
            yt[i] = y[i]
                + h * (A151 * k[0][i]
                    + A156 * k[5][i]
                    + A157 * k[6][i]
                    + A158 * k[7][i]
                    + A1511 * k[10][i]
                    + A1512 * k[11][i]
                    + A1513 * k13[i]
                    + A1514 * k14[i]);
        }
        let mut k15 = [0.0; N];
        rhs.derivs(t + C15 * h, &yt, &mut k15);
        for i in 0..N {
            yt[i] = y[i]
                + h * (A161 * k[0][i]
                    + A166 * k[5][i]
                    + A167 * k[6][i]
                    + A168 * k[7][i]
                    + A169 * k[8][i]
                    + A1613 * k13[i]
                    + A1614 * k14[i]
                    + A1615 * k15[i]);
        }
        let mut k16 = [0.0; N];
        rhs.derivs(t + C16 * h, &yt, &mut k16);
        self.stats.fn_evals += 4;

        for i in 0..N {
            let ydiff = y_new[i] - y[i];
            let bspl = h * k[0][i] - ydiff;
            self.rcont[0][i] = y[i];
            self.rcont[1][i] = ydiff;
            self.rcont[2][i] = bspl;
            self.rcont[3][i] = ydiff - h * k13[i] - bspl;
            self.rcont[4][i] = h
                * (D41 * k[0][i]
                    + D46 * k[5][i]
                    + D47 * k[6][i]
                    + D48 * k[7][i]
                    + D49 * k[8][i]
                    + D410 * k[9][i]
                    + D411 * k[10][i]
                    + D412 * k[11][i]
                    + D413 * k13[i]
                    + D414 * k14[i]
                    + D415 * k15[i]
                    + D416 * k16[i]);
            self.rcont[5][i] = h
                * (D51 * k[0][i]
                    + D56 * k[5][i]
                    + D57 * k[6][i]
                    + D58 * k[7][i]
                    + D59 * k[8][i]
                    + D510 * k[9][i]
                    + D511 * k[10][i]
                    + D512 * k[11][i]
                    + D513 * k13[i]
                    + D514 * k14[i]
                    + D515 * k15[i]
                    + D516 * k16[i]);
            self.rcont[6][i] = h
                * (D61 * k[0][i]
                    + D66 * k[5][i]
                    + D67 * k[6][i]
                    + D68 * k[7][i]
                    + D69 * k[8][i]
                    + D610 * k[9][i]
                    + D611 * k[10][i]
                    + D612 * k[11][i]
                    + D613 * k13[i]
                    + D614 * k14[i]
                    + D615 * k15[i]
                    + D616 * k16[i]);
            self.rcont[7][i] = h
                * (D71 * k[0][i]
                    + D76 * k[5][i]
                    + D77 * k[6][i]
                    + D78 * k[7][i]
                    + D79 * k[8][i]
                    + D710 * k[9][i]
                    + D711 * k[10][i]
                    + D712 * k[11][i]
                    + D713 * k13[i]
                    + D714 * k14[i]
                    + D715 * k15[i]
                    + D716 * k16[i]);
        }

        self.t_old = t;
        self.t = t + h;
        self.y = y_new;
        self.dydt = k13;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// y'' = -omega^2 y, state [y, y'].
    struct Oscillator {
        omega: f64,
    }

    impl OdeRhs<2> for Oscillator {
        fn derivs(&self, _t: f64, y: &[f64; 2], dydt: &mut [f64; 2]) {
            dydt[0] = y[1];
            dydt[1] = -self.omega * self.omega * y[0];
        }
    }

    fn integrate_to<const N: usize, R: OdeRhs<N>>(
        stepper: &mut Dopr853<N>,
        rhs: &R,
        tf: f64,
        h0: f64,
    ) {
        let mut h = h0;
        while tf - stepper.t() > 1e-12 {
            if stepper.t() + h > tf {
                h = tf - stepper.t();
            }
            let (_, h_next) = stepper.step(h, rhs).unwrap();
            h = h_next;
        }
    }

    #[test]
    fn test_oscillator_one_period() {
        let sys = Oscillator { omega: 1.0 };
        let tf = 2.0 * std::f64::consts::PI;
        let mut stepper = Dopr853::new(0.0, [1.0, 0.0], 1e-13, 0.0);
        integrate_to(&mut stepper, &sys, tf, 0.1);
        assert!((stepper.t() - tf).abs() < 1e-12);
        assert!(
            (stepper.y()[0] - 1.0).abs() < 1e-9,
            "y(2pi) = {}",
            stepper.y()[0]
        );
        assert!(stepper.y()[1].abs() < 1e-9, "y'(2pi) = {}", stepper.y()[1]);
    }

    #[test]
    fn test_h_did_positive_and_dense_endpoints() {
        let sys = Oscillator { omega: 2.0 };
        let mut stepper = Dopr853::new(0.0, [0.5, 0.1], 1e-13, 0.0);
        let y_before = *stepper.y();
        let t_before = stepper.t();
        let (h_did, _) = stepper.step(0.05, &sys).unwrap();
        assert!(h_did > 0.0);
        // dense output reproduces both step endpoints
        for i in 0..2 {
            assert!(
                (stepper.dense_out(i, t_before) - y_before[i]).abs() < 1e-10,
                "dense output mismatch at left endpoint, component {}",
                i
            );
            assert!(
                (stepper.dense_out(i, t_before + h_did) - stepper.y()[i]).abs() < 1e-10,
                "dense output mismatch at right endpoint, component {}",
                i
            );
        }
    }

    #[test]
    fn test_dense_output_midpoint_accuracy() {
        let sys = Oscillator { omega: 1.0 };
        let mut stepper = Dopr853::new(0.0, [1.0, 0.0], 1e-13, 0.0);
        let (h_did, _) = stepper.step(0.2, &sys).unwrap();
        let tm = 0.5 * h_did;
        let y_interp = stepper.dense_out(0, tm);
        assert!(
            (y_interp - tm.cos()).abs() < 1e-10,
            "dense midpoint {} vs cos {}",
            y_interp,
            tm.cos()
        );
    }

    #[test]
    fn test_free_fall_parabola() {
        // z'' = -g
        struct FreeFall;
        impl OdeRhs<2> for FreeFall {
            fn derivs(&self, _t: f64, y: &[f64; 2], dydt: &mut [f64; 2]) {
                dydt[0] = y[1];
                dydt[1] = -9.80665;
            }
        }
        let mut stepper = Dopr853::new(0.0, [0.0, 5.0], 1e-13, 0.0);
        integrate_to(&mut stepper, &FreeFall, 1.0, 0.05);
        let exact = 5.0 - 0.5 * 9.80665;
        assert!((stepper.y()[0] - exact).abs() < 1e-10);
        assert!((stepper.y()[1] - (5.0 - 9.80665)).abs() < 1e-10);
    }

    #[test]
    fn test_oversized_step_is_rejected_then_converges() {
        let sys = Oscillator { omega: 10.0 };
        let mut stepper = Dopr853::new(0.0, [1.0, 0.0], 1e-13, 0.0);
        integrate_to(&mut stepper, &sys, 1.0, 50.0);
        assert!(stepper.stats.rejected_steps > 0);
        assert!((stepper.y()[0] - (10.0f64).cos()).abs() < 1e-8);
    }

    #[test]
    fn test_non_finite_rhs_is_an_error() {
        struct Blowup;
        impl OdeRhs<1> for Blowup {
            fn derivs(&self, _t: f64, y: &[f64; 1], dydt: &mut [f64; 1]) {
                dydt[0] = 1.0 / (y[0] * y[0]) * f64::NAN;
            }
        }
        let mut stepper = Dopr853::new(0.0, [1.0], 1e-13, 0.0);
        assert!(stepper.step(0.1, &Blowup).is_err());
    }

    #[test]
    fn test_reset_restarts_cleanly() {
        let sys = Oscillator { omega: 1.0 };
        let mut stepper = Dopr853::new(0.0, [1.0, 0.0], 1e-13, 0.0);
        stepper.step(0.1, &sys).unwrap();
        stepper.reset(0.0, [1.0, 0.0]);
        assert_eq!(stepper.t(), 0.0);
        integrate_to(&mut stepper, &sys, 1.0, 0.1);
        assert!((stepper.y()[0] - 1.0f64.cos()).abs() < 1e-10);
    }

    #[test]
    fn test_eighth_order_single_step_convergence() {
        // y' = cos t, one forced step each; local error ~ O(h^9)
        struct Cosine;
        impl OdeRhs<1> for Cosine {
            fn derivs(&self, t: f64, _y: &[f64; 1], dydt: &mut [f64; 1]) {
                dydt[0] = t.cos();
            }
        }
        let mut errors = Vec::new();
        for &h in &[0.8, 0.4] {
            let mut stepper = Dopr853::new(0.0, [0.0], 1e3, 0.0); // accept anything
            stepper.step(h, &Cosine).unwrap();
            errors.push((stepper.y()[0] - h.sin()).abs());
        }
        let ratio = errors[0] / errors[1];
        assert!(
            ratio > 100.0,
            "error ratio {} too small for an 8th-order method",
            ratio
        );
    }
}
